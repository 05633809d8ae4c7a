use argon2::password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand::rngs::OsRng;
use sha2::{Digest, Sha512};

/// 生成盐并计算密码哈希，返回 (salt, hashed_password)
pub fn hash_password(password: &str) -> Result<(String, String), password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hashed = Argon2::default()
        .hash_password(password.as_bytes(), &salt)?
        .to_string();
    Ok((salt.as_str().to_string(), hashed))
}

/// 校验密码
///
/// 旧数据库中的 `sha512(password + salt)` 十六进制哈希同样可以校验。
pub fn verify_password(password: &str, salt: &str, hashed_password: &str) -> bool {
    match PasswordHash::new(hashed_password) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => is_legacy_hash(hashed_password) && legacy_hash(password, salt) == hashed_password,
    }
}

/// 旧格式的哈希需要重新计算
pub fn needs_rehash(hashed_password: &str) -> bool {
    PasswordHash::new(hashed_password).is_err()
}

fn is_legacy_hash(hashed_password: &str) -> bool {
    hashed_password.len() == 128 && hashed_password.chars().all(|c| c.is_ascii_hexdigit())
}

fn legacy_hash(password: &str, salt: &str) -> String {
    format!("{:x}", Sha512::digest(format!("{password}{salt}")))
}
