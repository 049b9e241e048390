/// Default answer normalization for voting: lowercase and trim.
pub fn normalize_answer(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Extracts the final `\boxed{…}` payload from LaTeX-formatted math
/// answers, balancing inner braces and dropping `\text{…}` annotations.
/// Returns an empty string when no `\boxed` is present.
pub fn extract_boxed_answer(text: &str) -> String {
    let Some(start) = text.rfind("\\boxed{") else {
        return String::new();
    };
    let body_start = start + "\\boxed{".len();

    let mut depth = 1usize;
    let mut end = None;
    for (i, ch) in text[body_start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    end = Some(body_start + i);
                    break;
                }
            }
            _ => {}
        }
    }
    let Some(end) = end else {
        return String::new();
    };

    strip_text_annotations(&text[body_start..end]).trim().to_string()
}

/// Removes `\text{…}` blocks, keeping everything around them.
fn strip_text_annotations(body: &str) -> String {
    let mut result = String::with_capacity(body.len());
    let mut rest = body;
    while let Some(at) = rest.find("\\text{") {
        result.push_str(&rest[..at]);
        let after = &rest[at + "\\text{".len()..];
        let mut depth = 1usize;
        let mut consumed = after.len();
        for (i, ch) in after.char_indices() {
            match ch {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        consumed = i + 1;
                        break;
                    }
                }
                _ => {}
            }
        }
        rest = &after[consumed.min(after.len())..];
    }
    result.push_str(rest);
    result
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("the answer is \\boxed{\\frac{1}{2}}", "\\frac{1}{2}")]
    #[case("\\boxed{42 \\text{ meters}}", "42")]
    #[case("no boxed content here", "")]
    #[case("\\boxed{a + \\boxed{b}}", "b")]
    #[case("\\boxed{unclosed", "")]
    fn boxed_extraction(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(extract_boxed_answer(input), expected);
    }

    #[test]
    fn normalization_lowercases_and_trims() {
        assert_eq!(normalize_answer("  Paris \n"), "paris");
    }
}
