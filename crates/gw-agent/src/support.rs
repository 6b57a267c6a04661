pub(crate) fn format_error_chain(err: &anyhow::Error) -> String {
    let mut parts = Vec::<String>::new();
    for cause in err.chain() {
        let s = cause.to_string();
        if s.is_empty() {
            continue;
        }
        if parts.last() == Some(&s) {
            continue;
        }
        parts.push(s);
    }
    if parts.is_empty() {
        "unknown error".to_string()
    } else {
        parts.join(": ")
    }
}

pub(crate) fn error_chain_string(err: &(dyn std::error::Error + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(cause) = source {
        let s = cause.to_string();
        // Many error types repeat their cause in Display; skip those.
        if !parts.last().is_some_and(|p| p.contains(&s)) {
            parts.push(s);
        }
        source = cause.source();
    }
    parts.join(": ")
}

pub(crate) fn tail_lines(text: &str, max_lines: usize) -> Vec<String> {
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(max_lines);
    all[start..].iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_chain_skips_repeated_causes() {
        let inner = std::io::Error::other("disk gone");
        let err = anyhow::Error::from(inner).context("copy failed");
        assert_eq!(format_error_chain(&err), "copy failed: disk gone");
    }

    #[test]
    fn tail_keeps_only_the_last_lines() {
        let text = "a\nb\nc\nd\n";
        assert_eq!(tail_lines(text, 2), vec!["c", "d"]);
        assert_eq!(tail_lines(text, 10).len(), 4);
        assert!(tail_lines("", 3).is_empty());
    }
}
