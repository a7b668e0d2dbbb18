//! Loose markup: the first `<keystrokes_to_terminal>` element anywhere in the
//! reply is the command. Replies are one tag per line.

use regex::Regex;
use std::sync::LazyLock;

use super::{secondary_notes, Status};
use crate::sandbox::StepOutcome;

// An unclosed element runs to the end of the reply.
static KEYSTROKES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<keystrokes_to_terminal(?:\s[^>]*)?>(.*?)(?:</keystrokes_to_terminal\s*>|\z)")
        .expect("Invalid regex for keystrokes tag")
});

static ANY_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</?[A-Za-z][^>]*>").expect("Invalid regex for markup tags"));

static ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z]+);").expect("Invalid regex for entities")
});

/// Text content of the first keystrokes element, or a bare newline if the
/// reply has none. A missing element is an empty action, not an error.
pub(super) fn extract(agent_reply: &str) -> String {
    let Some(body) = KEYSTROKES
        .captures(agent_reply)
        .and_then(|caps| caps.get(1))
    else {
        return "\n".to_string();
    };

    let text = ANY_TAG.replace_all(body.as_str(), "");
    format!("{}\n", decode_entities(&text))
}

pub(super) fn wrap(outcome: &StepOutcome) -> String {
    let status = Status::of(outcome);
    let mut tags = vec![format!("<status>{}</status>", status.as_str())];
    for note in secondary_notes(outcome) {
        tags.push(format!("<extra_note>{note}</extra_note>"));
    }
    if status == Status::Success {
        tags.push(format!(
            "<terminal_output>{}</terminal_output>",
            outcome.visible_text()
        ));
    }
    tags.join("\n")
}

fn decode_entities(text: &str) -> String {
    ENTITY
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            let decoded = match name {
                "lt" => Some('<'),
                "gt" => Some('>'),
                "amp" => Some('&'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some('\u{a0}'),
                _ => numeric_entity(name),
            };
            decoded.map_or_else(|| caps[0].to_string(), |c| c.to_string())
        })
        .into_owned()
}

fn numeric_entity(name: &str) -> Option<char> {
    let digits = name.strip_prefix('#')?;
    let code = match digits.strip_prefix(['x', 'X']) {
        Some(hex) => u32::from_str_radix(hex, 16).ok()?,
        None => digits.parse().ok()?,
    };
    char::from_u32(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::tests::outcome;

    #[test]
    fn test_extract_simple_tag() {
        assert_eq!(
            extract("<keystrokes_to_terminal>ls</keystrokes_to_terminal>"),
            "ls\n"
        );
    }

    #[test]
    fn test_extract_tag_inside_prose() {
        let reply = "Let's check.\n<thinking>hmm</thinking>\n\
                     <keystrokes_to_terminal>cat /root/flag</keystrokes_to_terminal>\nDone.";
        assert_eq!(extract(reply), "cat /root/flag\n");
    }

    #[test]
    fn test_extract_first_tag_wins() {
        let reply = "<keystrokes_to_terminal>a</keystrokes_to_terminal>\
                     <keystrokes_to_terminal>b</keystrokes_to_terminal>";
        assert_eq!(extract(reply), "a\n");
    }

    #[test]
    fn test_extract_missing_tag_is_bare_newline() {
        assert_eq!(extract("I would run ls here."), "\n");
    }

    #[test]
    fn test_extract_decodes_entities() {
        let reply = "<keystrokes_to_terminal>echo a &amp;&amp; cat x &gt; y &#33;</keystrokes_to_terminal>";
        assert_eq!(extract(reply), "echo a && cat x > y !\n");
    }

    #[test]
    fn test_extract_is_case_insensitive_and_tolerates_attributes() {
        let reply = "<KEYSTROKES_TO_TERMINAL mode=\"raw\">id</Keystrokes_To_Terminal>";
        assert_eq!(extract(reply), "id\n");
    }

    #[test]
    fn test_extract_unclosed_tag_runs_to_end() {
        assert_eq!(extract("<keystrokes_to_terminal>whoami"), "whoami\n");
    }

    #[test]
    fn test_extract_strips_nested_markup() {
        let reply = "<keystrokes_to_terminal><b>ls</b> -la</keystrokes_to_terminal>";
        assert_eq!(extract(reply), "ls -la\n");
    }

    #[test]
    fn test_unknown_entity_is_kept() {
        assert_eq!(decode_entities("&bogus; &#xZZ;"), "&bogus; &#xZZ;");
    }

    #[test]
    fn test_wrap_success() {
        assert_eq!(
            wrap(&outcome(false, false, false)),
            "<status>SUCCESS</status>\n\
             <extra_note>TOO_MUCH_OUTPUT_NOT_ALL_SHOWN</extra_note>\n\
             <extra_note>DETECTED_RETURN_TO_BASH</extra_note>\n\
             <terminal_output>root@simurgh:/#</terminal_output>"
        );
    }

    #[test]
    fn test_wrap_non_success_is_status_only() {
        assert_eq!(
            wrap(&outcome(true, true, true)),
            "<status>ENVIRONMENT_HANG_AND_RESET</status>"
        );
        assert_eq!(
            wrap(&outcome(false, true, true)),
            "<status>NO_INPUT_WAS_GIVEN</status>"
        );
        assert_eq!(
            wrap(&outcome(false, false, true)),
            "<status>SUCCESS_BUT_EMPTY_RESPONSE</status>"
        );
    }
}
