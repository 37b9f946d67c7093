//! Tokenizing and flag parsing for terminal input

use std::collections::HashMap;

use super::CommandError;
use crate::pipeline::{DeployRequest, DeployStrategy};

/// Split on whitespace; double quotes group words and are stripped
pub fn tokenize(line: &str) -> Result<Vec<String>, CommandError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;

    for c in line.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    tokens.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }

    if in_quotes {
        return Err(CommandError::UnterminatedQuote);
    }
    if has_token {
        tokens.push(current);
    }
    Ok(tokens)
}

/// Parse `--name value` and `--name=value` pairs. Every argument must be a
/// known flag with a value.
pub fn parse_flags(verb: &str, args: &[String], known: &[&str]) -> Result<HashMap<String, String>, CommandError> {
    let mut flags = HashMap::new();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        let Some(body) = arg.strip_prefix("--") else {
            return Err(CommandError::Usage(format!("{verb}: unexpected argument '{arg}'")));
        };
        let (name, value) = match body.split_once('=') {
            Some((name, value)) => (name.to_string(), value.to_string()),
            None => {
                let value = iter
                    .next()
                    .filter(|v| !v.starts_with("--"))
                    .ok_or_else(|| CommandError::Usage(format!("{verb}: flag --{body} needs a value")))?;
                (body.to_string(), value.clone())
            }
        };
        if !known.contains(&name.as_str()) {
            return Err(CommandError::Usage(format!("{verb}: unknown flag --{name}")));
        }
        flags.insert(name, value);
    }
    Ok(flags)
}

pub fn parse_deploy(args: &[String]) -> Result<DeployRequest, CommandError> {
    let flags = parse_flags("deploy", args, &["strategy", "weight", "version"])?;
    let mut request = DeployRequest::default();

    if let Some(strategy) = flags.get("strategy") {
        request.strategy = Some(strategy.parse::<DeployStrategy>()?);
    }
    if let Some(weight) = flags.get("weight") {
        let weight = weight
            .trim_end_matches('%')
            .parse::<u8>()
            .ok()
            .filter(|w| (1..=99).contains(w))
            .ok_or_else(|| CommandError::InvalidFlag {
                flag: "weight".to_string(),
                value: weight.clone(),
                reason: "expected an integer between 1 and 99".to_string(),
            })?;
        request.weight = Some(weight);
    }
    if let Some(version) = flags.get("version") {
        if version.is_empty() {
            return Err(CommandError::InvalidFlag {
                flag: "version".to_string(),
                value: version.clone(),
                reason: "version must not be empty".to_string(),
            });
        }
        request.version = Some(version.clone());
    }
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(line: &str) -> Vec<String> {
        tokenize(line).unwrap()
    }

    #[test]
    fn test_tokenize_quotes() {
        assert_eq!(args(r#"echo "hello   world" x"#), vec!["echo", "hello   world", "x"]);
        assert_eq!(args("  ls   -la  "), vec!["ls", "-la"]);
        assert_eq!(args(r#"echo """#), vec!["echo", ""]);
        assert!(tokenize(r#"echo "open"#).is_err());
    }

    #[test]
    fn test_deploy_flag_forms() {
        let a = parse_deploy(&args("--weight=30 --strategy canary")).unwrap();
        assert_eq!(a.weight, Some(30));
        assert_eq!(a.strategy, Some(DeployStrategy::Canary));

        let b = parse_deploy(&args("--version v2.0.0 --strategy=blue-green")).unwrap();
        assert_eq!(b.version.as_deref(), Some("v2.0.0"));
        assert_eq!(b.strategy, Some(DeployStrategy::BlueGreen));

        assert_eq!(parse_deploy(&[]).unwrap(), DeployRequest::default());
    }

    #[test]
    fn test_deploy_rejects_bad_input() {
        assert!(matches!(
            parse_deploy(&args("--weight 150")),
            Err(CommandError::InvalidFlag { .. })
        ));
        assert!(matches!(
            parse_deploy(&args("--weight abc")),
            Err(CommandError::InvalidFlag { .. })
        ));
        assert!(parse_deploy(&args("--weight")).is_err());
        assert!(parse_deploy(&args("--color red")).is_err());
        assert!(parse_deploy(&args("now")).is_err());
        assert!(parse_deploy(&args("--strategy rolling")).is_err());
    }
}
