//! Field extraction from AT response lines.
//!
//! Lines look like `+TAG: a,"b",,"c,d"`. Commas inside quotes belong to
//! the value, so splitting on `,` alone is not enough.

/// Strip `prefix` and the whitespace after it.
pub fn payload<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    line.strip_prefix(prefix).map(str::trim_start)
}

/// Split a payload into comma-separated fields, honouring quotes.
///
/// Quoted fields are returned without their quotes; empty fields are kept
/// so positions stay stable.
pub fn split_fields(payload: &str) -> Vec<&str> {
    let mut fields = Vec::new();
    let mut start = 0;
    let mut in_quote = false;

    for (i, c) in payload.char_indices() {
        match c {
            '"' => in_quote = !in_quote,
            ',' if !in_quote => {
                fields.push(unquote(&payload[start..i]));
                start = i + 1;
            }
            _ => {}
        }
    }
    fields.push(unquote(&payload[start..]));
    fields
}

/// Every quoted token in `line`, in order.
pub fn quoted_tokens(line: &str) -> Vec<&str> {
    line.split('"').skip(1).step_by(2).collect()
}

fn unquote(field: &str) -> &str {
    let field = field.trim();
    field
        .strip_prefix('"')
        .and_then(|f| f.strip_suffix('"'))
        .unwrap_or(field)
}

/// `+?digits`, the shape of a phone number field.
pub fn is_phone_number(token: &str) -> bool {
    let digits = token.strip_prefix('+').unwrap_or(token);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// `dd/mm/yy,hh:mm:ss±zz`, the service-centre timestamp format.
pub fn is_timestamp(token: &str) -> bool {
    let bytes = token.as_bytes();
    if bytes.len() != 20 {
        return false;
    }
    let digit_at = |i: usize| bytes[i].is_ascii_digit();
    [0, 1, 3, 4, 6, 7, 9, 10, 12, 13, 15, 16, 18, 19]
        .iter()
        .all(|&i| digit_at(i))
        && bytes[2] == b'/'
        && bytes[5] == b'/'
        && bytes[8] == b','
        && bytes[11] == b':'
        && bytes[14] == b':'
        && (bytes[17] == b'+' || bytes[17] == b'-')
}

/// Parse a leading unsigned integer field.
pub fn parse_index(field: &str) -> Option<u32> {
    field.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_strips_prefix_and_space() {
        assert_eq!(payload("+CCWA: 1,1", "+CCWA:"), Some("1,1"));
        assert_eq!(payload("+CCWA:1,1", "+CCWA:"), Some("1,1"));
        assert_eq!(payload("RING", "+CCWA:"), None);
    }

    #[test]
    fn test_split_fields_keeps_commas_inside_quotes() {
        let fields = split_fields(r#"3,"REC UNREAD","+15551234",,"24/01/02,09:00:00+00""#);
        assert_eq!(
            fields,
            vec![
                "3",
                "REC UNREAD",
                "+15551234",
                "",
                "24/01/02,09:00:00+00"
            ]
        );
    }

    #[test]
    fn test_split_fields_single_field() {
        assert_eq!(split_fields("7"), vec!["7"]);
    }

    #[test]
    fn test_quoted_tokens() {
        let tokens = quoted_tokens(r#"+CMT: "+15551234","","24/01/02,09:00:00+00""#);
        assert_eq!(tokens, vec!["+15551234", "", "24/01/02,09:00:00+00"]);
    }

    #[test]
    fn test_quoted_tokens_unterminated_quote() {
        let tokens = quoted_tokens(r#"+CLIP: "+4917"#);
        assert_eq!(tokens, vec!["+4917"]);
    }

    #[test]
    fn test_is_phone_number() {
        assert!(is_phone_number("+491701234567"));
        assert!(is_phone_number("5551234"));
        assert!(!is_phone_number("+"));
        assert!(!is_phone_number(""));
        assert!(!is_phone_number("REC UNREAD"));
        assert!(!is_phone_number("+49 170"));
    }

    #[test]
    fn test_is_timestamp() {
        assert!(is_timestamp("24/01/02,09:00:00+00"));
        assert!(is_timestamp("23/12/31,23:59:59-20"));
        assert!(!is_timestamp("24/01/02 09:00:00+00"));
        assert!(!is_timestamp("24/01/02,09:00:00"));
        assert!(!is_timestamp("+15551234"));
    }

    #[test]
    fn test_parse_index() {
        assert_eq!(parse_index(" 12 "), Some(12));
        assert_eq!(parse_index("\"SM\""), None);
        assert_eq!(parse_index("-1"), None);
    }
}
