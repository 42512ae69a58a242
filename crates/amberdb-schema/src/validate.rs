use crate::{MAX_ENTITY_NAME_LEN, MAX_MEMBER_NAME_LEN};

/// Words the query grammar claims; entity and member names must not
/// shadow them or the tokenizer cannot distinguish identifiers.
const RESERVED: &[&str] = &[
    "and", "as", "delete", "false", "fetch", "from", "is", "join", "not", "null", "on", "or",
    "select", "set", "true", "update", "where",
];

/// Ensure an entity name is non-empty, ASCII, within limits, and not a
/// reserved grammar word.
pub(crate) fn validate_entity_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("entity name is empty".to_string());
    }
    if name.len() > MAX_ENTITY_NAME_LEN {
        return Err(format!(
            "entity name '{name}' exceeds max length {MAX_ENTITY_NAME_LEN}"
        ));
    }
    if !name.is_ascii() {
        return Err(format!("entity name '{name}' must be ASCII"));
    }
    is_reserved(name)?;
    validate_ident_chars(name)
}

/// Ensure a member (attribute/relation/collection/variant) name is valid.
pub(crate) fn validate_member_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("member name is empty".to_string());
    }
    if name.len() > MAX_MEMBER_NAME_LEN {
        return Err(format!(
            "member name '{name}' exceeds max length {MAX_MEMBER_NAME_LEN}"
        ));
    }
    is_reserved(name)?;
    validate_ident_chars(name)
}

fn validate_ident_chars(name: &str) -> Result<(), String> {
    let mut chars = name.chars();
    let leading_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');

    if !leading_ok || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(format!(
            "name '{name}' must start with a letter or underscore and contain only letters, digits, and underscores"
        ));
    }

    Ok(())
}

fn is_reserved(word: &str) -> Result<(), String> {
    if RESERVED.contains(&word.to_ascii_lowercase().as_str()) {
        return Err(format!("the word '{word}' is reserved"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_reserved_words() {
        assert!(validate_entity_name("").is_err(), "empty names should fail");
        assert!(
            validate_entity_name("Select").is_err(),
            "reserved grammar words should be rejected case-insensitively"
        );
        assert!(validate_member_name("fetch").is_err());
    }

    #[test]
    fn accepts_ordinary_identifiers() {
        assert!(validate_entity_name("Member").is_ok());
        assert!(validate_member_name("homeAddress").is_ok());
        assert!(validate_member_name("work_period").is_ok());
    }

    #[test]
    fn rejects_bad_leading_chars() {
        assert!(validate_member_name("1age").is_err());
        assert!(validate_member_name("a-b").is_err());
    }
}
