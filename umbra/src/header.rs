//! FITS header table: ordered keyword cards with raw value text.
//!
//! Only the card syntax is handled here. Interpreting keywords (WCS,
//! exposure metadata, ...) belongs to the metadata layer.

pub const CARD_LEN: usize = 80;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderCard {
    pub keyword: String,
    /// Raw value text, present for `KEYWORD = value` cards.
    pub value: Option<String>,
    pub comment: Option<String>,
}

impl HeaderCard {
    /// Parses one 80-byte card. Bytes outside printable ASCII are replaced.
    pub fn parse(card: &[u8]) -> Self {
        let text: String = card
            .iter()
            .map(|&b| if (0x20..0x7f).contains(&b) { b as char } else { ' ' })
            .collect();
        let keyword = text.get(..8).unwrap_or(&text).trim_end().to_string();

        if text.get(8..10) != Some("= ") {
            let rest = text.get(8..).unwrap_or("").trim();
            return Self {
                keyword,
                value: None,
                comment: (!rest.is_empty()).then(|| rest.to_string()),
            };
        }

        let (value, comment) = split_value_comment(&text[10..]);
        Self {
            keyword,
            value: Some(value),
            comment,
        }
    }

    /// Formats the card as exactly 80 bytes.
    pub fn format(&self) -> Vec<u8> {
        let mut text = format!("{:<8}", self.keyword);
        // Strings start in column 11, other values end in column 30.
        match &self.value {
            Some(value) if value.starts_with('\'') => text.push_str(&format!("= {:<20}", value)),
            Some(value) => text.push_str(&format!("= {:>20}", value)),
            None => {}
        }
        if let Some(comment) = &self.comment {
            text.push_str(if self.value.is_some() { " / " } else { "  " });
            text.push_str(comment);
        }
        let mut bytes = text.into_bytes();
        bytes.resize(CARD_LEN, b' ');
        bytes
    }
}

/// Splits `value / comment`, ignoring slashes inside quoted strings.
fn split_value_comment(field: &str) -> (String, Option<String>) {
    let mut in_string = false;
    for (idx, ch) in field.char_indices() {
        match ch {
            '\'' => in_string = !in_string,
            '/' if !in_string => {
                let comment = field[idx + 1..].trim();
                return (
                    field[..idx].trim().to_string(),
                    (!comment.is_empty()).then(|| comment.to_string()),
                );
            }
            _ => {}
        }
    }
    (field.trim().to_string(), None)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderTable {
    cards: Vec<HeaderCard>,
}

impl HeaderTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, card: HeaderCard) {
        self.cards.push(card);
    }

    /// Sets `keyword` to `value`, replacing the first existing card.
    pub fn set(&mut self, keyword: &str, value: impl Into<String>) {
        let value = Some(value.into());
        match self.cards.iter_mut().find(|c| c.keyword == keyword) {
            Some(card) => card.value = value,
            None => self.cards.push(HeaderCard {
                keyword: keyword.to_string(),
                value,
                comment: None,
            }),
        }
    }

    pub fn cards(&self) -> &[HeaderCard] {
        &self.cards
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    /// Raw value text of the first card named `keyword`.
    pub fn get(&self, keyword: &str) -> Option<&str> {
        self.cards
            .iter()
            .find(|c| c.keyword == keyword)
            .and_then(|c| c.value.as_deref())
    }

    pub fn get_i64(&self, keyword: &str) -> Option<i64> {
        self.get(keyword)?.parse().ok()
    }

    pub fn get_f64(&self, keyword: &str) -> Option<f64> {
        // FITS allows Fortran-style exponents.
        self.get(keyword)?.replace(['D', 'd'], "E").parse().ok()
    }

    pub fn get_bool(&self, keyword: &str) -> Option<bool> {
        match self.get(keyword)? {
            "T" => Some(true),
            "F" => Some(false),
            _ => None,
        }
    }

    /// String value with quotes removed, `''` unescaped and trailing blanks trimmed.
    pub fn get_string(&self, keyword: &str) -> Option<String> {
        let raw = self.get(keyword)?;
        let inner = raw.strip_prefix('\'')?.strip_suffix('\'')?;
        Some(inner.replace("''", "'").trim_end().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(text: &str) -> Vec<u8> {
        let mut bytes = text.as_bytes().to_vec();
        bytes.resize(CARD_LEN, b' ');
        bytes
    }

    #[test]
    fn test_parse_value_and_comment() {
        let c = HeaderCard::parse(&card("BITPIX  =                  -32 / number of bits"));
        assert_eq!(c.keyword, "BITPIX");
        assert_eq!(c.value.as_deref(), Some("-32"));
        assert_eq!(c.comment.as_deref(), Some("number of bits"));
    }

    #[test]
    fn test_slash_inside_string_is_not_comment() {
        let c = HeaderCard::parse(&card("OBJECT  = 'M31 / disk'  / target"));
        assert_eq!(c.value.as_deref(), Some("'M31 / disk'"));
        assert_eq!(c.comment.as_deref(), Some("target"));
    }

    #[test]
    fn test_commentary_card_has_no_value() {
        let c = HeaderCard::parse(&card("COMMENT   processed by the pipeline"));
        assert_eq!(c.keyword, "COMMENT");
        assert!(c.value.is_none());
        assert_eq!(c.comment.as_deref(), Some("processed by the pipeline"));
    }

    #[test]
    fn test_typed_getters() {
        let mut table = HeaderTable::new();
        for text in [
            "SIMPLE  =                    T",
            "NAXIS1  =                 2048",
            "EXPTIME =               1.5D+1",
            "OBSERVER= 'O''Neil  '",
        ] {
            table.push(HeaderCard::parse(&card(text)));
        }
        assert_eq!(table.get_bool("SIMPLE"), Some(true));
        assert_eq!(table.get_i64("NAXIS1"), Some(2048));
        assert_eq!(table.get_f64("EXPTIME"), Some(15.0));
        assert_eq!(table.get_string("OBSERVER").as_deref(), Some("O'Neil"));
        assert_eq!(table.get("MISSING"), None);
    }

    #[test]
    fn test_format_then_parse() {
        let original = HeaderCard {
            keyword: "NAXIS2".to_string(),
            value: Some("512".to_string()),
            comment: Some("rows".to_string()),
        };
        let bytes = original.format();
        assert_eq!(bytes.len(), CARD_LEN);
        assert_eq!(HeaderCard::parse(&bytes), original);
    }

    #[test]
    fn test_string_value_starts_in_column_eleven() {
        let card = HeaderCard {
            keyword: "XTENSION".to_string(),
            value: Some("'IMAGE   '".to_string()),
            comment: None,
        };
        let bytes = card.format();
        assert!(bytes.starts_with(b"XTENSION= 'IMAGE   '"));
        assert_eq!(HeaderCard::parse(&bytes), card);
    }

    #[test]
    fn test_set_replaces_existing_value() {
        let mut table = HeaderTable::new();
        table.set("BITPIX", "16");
        table.set("BITPIX", "-64");
        assert_eq!(table.len(), 1);
        assert_eq!(table.get_i64("BITPIX"), Some(-64));
    }
}
