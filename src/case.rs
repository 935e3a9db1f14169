//! Identifier case conversion for generated schema names and titles.

/// Convert a snake_case identifier to PascalCase.
/// e.g. "location_log" -> "LocationLog"
pub fn to_pascal_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut capitalize_next = true;
    for c in s.chars() {
        if c == '_' {
            capitalize_next = true;
        } else if capitalize_next {
            out.extend(c.to_uppercase());
            capitalize_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// Convert a snake_case identifier to a capitalized human name.
/// e.g. "location_log" -> "Location Log"
pub fn to_title_case(s: &str) -> String {
    s.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pascal_case() {
        assert_eq!(to_pascal_case("user"), "User");
        assert_eq!(to_pascal_case("location_log"), "LocationLog");
        assert_eq!(to_pascal_case("user_role"), "UserRole");
    }

    #[test]
    fn title_case() {
        assert_eq!(to_title_case("user"), "User");
        assert_eq!(to_title_case("location_log"), "Location Log");
    }
}
