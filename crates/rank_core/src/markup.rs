//! `&`-style colour code handling.
//!
//! Prefixes and display templates are written with `&` codes (`&c`, `&l`,
//! `&r`). Hosts expect the section-sign form (`§c`). Only valid code
//! characters are translated; a lone `&` or `&` followed by anything else is
//! left as typed.

const SECTION: char = '§';
const CODES: &str = "0123456789AaBbCcDdEeFfKkLlMmNnOoRrXx";

fn is_code(c: char) -> bool {
    CODES.contains(c)
}

/// Translates `&x` colour codes into `§x` codes.
pub fn render(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match chars.peek() {
            Some(&next) if c == '&' && is_code(next) => {
                out.push(SECTION);
                out.push(next.to_ascii_lowercase());
                chars.next();
            }
            _ => out.push(c),
        }
    }
    out
}

/// Removes both `&x` and `§x` colour codes.
pub fn strip(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match chars.peek() {
            Some(&next) if (c == '&' || c == SECTION) && is_code(next) => {
                chars.next();
            }
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_valid_codes_only() {
        assert_eq!(render("&c[Admin]"), "§c[Admin]");
        assert_eq!(render("&7&LBold"), "§7§lBold");
        assert_eq!(render("Tom & Jerry"), "Tom & Jerry");
        assert_eq!(render("&zno"), "&zno");
        assert_eq!(render("trailing&"), "trailing&");
    }

    #[test]
    fn strips_both_code_styles() {
        assert_eq!(strip("&c[Admin]"), "[Admin]");
        assert_eq!(strip("§1[GroupInfo]"), "[GroupInfo]");
        assert_eq!(strip("Tom & Jerry"), "Tom & Jerry");
    }
}
