//! Shared utility functions.
//!
//! Shell quoting helpers used whenever a command is assembled for a remote
//! host. Everything that crosses the SSH boundary goes through here.

/// Quote a single argument for a POSIX shell.
///
/// Arguments made only of safe characters are returned untouched so logged
/// commands stay readable. Anything else is wrapped in single quotes with
/// embedded quotes rewritten as `'"'"'`.
pub fn shell_quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,@%+".contains(c))
    {
        return arg.to_string();
    }
    format!("'{}'", escape_single_quotes(arg))
}

/// Replace every `'` with `'"'"'` so the text can sit inside a single-quoted
/// shell string.
pub fn escape_single_quotes(text: &str) -> String {
    text.replace('\'', r#"'"'"'"#)
}

/// Join already-split arguments into one shell command line.
pub fn shell_join<I, S>(args: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    args.into_iter()
        .map(|a| shell_quote(a.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Quote a path that may contain a glob. The glob part is left bare so the
/// remote shell still expands it.
///
/// Only `*` segments are supported, which is all the result-file layout needs.
pub fn quote_glob(path: &str) -> String {
    path.split('*')
        .map(|part| {
            if part.is_empty() {
                String::new()
            } else {
                shell_quote(part)
            }
        })
        .collect::<Vec<_>>()
        .join("*")
}

/// Last non-empty line of `text`, trimmed.
pub fn last_line(text: &str) -> Option<&str> {
    text.lines().rev().map(str::trim).find(|l| !l.is_empty())
}

/// Serde adapter storing a `Duration` as fractional seconds, so config files
/// can say `delay = 1.5`.
pub mod secs_f64 {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom(
                "expected a non-negative number of seconds",
            ));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote_plain() {
        assert_eq!(shell_quote("vllm/vllm-openai:v0.6.3"), "vllm/vllm-openai:v0.6.3");
        assert_eq!(shell_quote("--gpus=all"), "--gpus=all");
    }

    #[test]
    fn test_shell_quote_spaces_and_quotes() {
        assert_eq!(shell_quote("hello world"), "'hello world'");
        assert_eq!(shell_quote("it's"), r#"'it'"'"'s'"#);
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_escape_single_quotes() {
        assert_eq!(escape_single_quotes("echo 'hi'"), r#"echo '"'"'hi'"'"'"#);
        assert_eq!(escape_single_quotes("no quotes"), "no quotes");
    }

    #[test]
    fn test_shell_join() {
        assert_eq!(
            shell_join(["docker", "run", "-e", "A=b c"]),
            "docker run -e 'A=b c'"
        );
    }

    #[test]
    fn test_quote_glob_keeps_star_bare() {
        assert_eq!(
            quote_glob("/data/eval/job/*/reports/my model/gsm8k.json"),
            "/data/eval/job/*'/reports/my model/gsm8k.json'"
        );
        assert_eq!(quote_glob("/a/*/b"), "/a/*/b");
    }

    #[test]
    fn test_last_line() {
        assert_eq!(last_line("a\nb\n\n"), Some("b"));
        assert_eq!(last_line("  \n"), None);
        assert_eq!(last_line("only"), Some("only"));
    }
}
