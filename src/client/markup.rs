//! One-way conversion of reply text into the limited HTML the chat view
//! renders. Applied once when a reply arrives.

use regex::Regex;
use std::sync::OnceLock;

/// `(pattern, replacement)` pairs, applied top to bottom.
const RULES: [(&str, &str); 6] = [
    // bold
    (r"\*\*(.+?)\*\*", "<strong>$1</strong>"),
    // fenced code block
    (r"(?s)```(.*?)```", "<pre><code>$1</code></pre>"),
    // list item
    (r"(?m)^- (.*)$", "<li>$1</li>"),
    // heading
    (r"(?m)^### (.*)$", "<h3>$1</h3>"),
    // paragraph break
    (r"\n{2,}", "<br/><br/>"),
    // line break
    (r"\n", "<br/>"),
];

fn rules() -> &'static [(Regex, &'static str)] {
    static COMPILED: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        RULES
            .iter()
            .map(|(pattern, replacement)| {
                let regex = Regex::new(pattern).expect("markup rule must compile");
                (regex, *replacement)
            })
            .collect()
    })
}

pub fn markup(text: &str) -> String {
    rules().iter().fold(text.to_string(), |acc, (regex, replacement)| {
        regex.replace_all(&acc, *replacement).into_owned()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("plain text", "plain text")]
    #[case("**I am Jarvis.**", "<strong>I am Jarvis.</strong>")]
    #[case("a **b** c **d**", "a <strong>b</strong> c <strong>d</strong>")]
    #[case("### Title", "<h3>Title</h3>")]
    #[case("- one\n- two", "<li>one</li><br/><li>two</li>")]
    #[case("first\nsecond", "first<br/>second")]
    #[case("first\n\n\nsecond", "first<br/><br/>second")]
    #[case("```let x = 1;```", "<pre><code>let x = 1;</code></pre>")]
    fn single_rules(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(markup(input), expected);
    }

    #[test]
    fn list_marker_only_at_line_start() {
        assert_eq!(markup("well - maybe"), "well - maybe");
    }

    #[test]
    fn headings_and_lists_after_a_paragraph_break() {
        assert_eq!(
            markup("Intro\n\n### Steps\n- **fast**\n- safe"),
            "Intro<br/><br/><h3>Steps</h3><br/><li><strong>fast</strong></li><br/><li>safe</li>"
        );
    }

    #[test]
    fn code_block_spans_lines() {
        assert_eq!(
            markup("```\nfn main() {}\n```"),
            "<pre><code><br/>fn main() {}<br/></code></pre>"
        );
    }
}
