use serde_json::Value;
use std::env;
use std::path::PathBuf;

/// 用环境变量展开字符串中的 `$NAME` 和 `${NAME}`
///
/// `$NAME` 中的名称由字母、数字和下划线组成；`${...}` 中可以是任意不含 `}` 的名称。
/// 未定义的变量保持原样。
pub fn expand_vars(text: &str) -> String {
    expand_with(text, |name| env::var(name).ok())
}

/// 使用给定的查找函数展开变量
pub fn expand_with<F>(text: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut output = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(position) = rest.find('$') {
        output.push_str(&rest[..position]);
        let after = &rest[position + 1..];

        if let Some(braced) = after.strip_prefix('{') {
            if let Some(end) = braced.find('}') {
                let name = &braced[..end];
                match lookup(name) {
                    Some(value) => output.push_str(&value),
                    None => output.push_str(&rest[position..position + end + 3]),
                }
                rest = &braced[end + 1..];
                continue;
            }
            output.push('$');
            rest = after;
            continue;
        }

        let end = after
            .find(|c: char| !(c.is_alphanumeric() || c == '_'))
            .unwrap_or(after.len());
        let name = &after[..end];
        match lookup(name) {
            Some(value) if !name.is_empty() => output.push_str(&value),
            _ => {
                output.push('$');
                output.push_str(name);
            }
        }
        rest = &after[end..];
    }

    output.push_str(rest);
    output
}

/// 递归展开配置树中的所有字符串
pub fn expand_tree(value: Value) -> Value {
    match value {
        Value::String(text) => Value::String(expand_vars(&text)),
        Value::Array(items) => Value::Array(items.into_iter().map(expand_tree).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (key, expand_tree(value)))
                .collect(),
        ),
        other => other,
    }
}

/// 展开路径开头的 `~`
pub fn expand_home(path: &str) -> PathBuf {
    let home = env::var("HOME").ok();
    match (path, home) {
        ("~", Some(home)) => PathBuf::from(home),
        (path, Some(home)) if path.starts_with("~/") => PathBuf::from(home).join(&path[2..]),
        (path, _) => PathBuf::from(path),
    }
}
