//! Pairing code formatting

/// Characters per group in a displayed pairing code
const GROUP_SIZE: usize = 4;

/// Format a raw pairing code for display: `ABCD1234` → `ABCD-1234`
pub fn format_pairing_code(raw: &str) -> String {
    let cleaned: Vec<char> = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .flat_map(char::to_uppercase)
        .collect();

    cleaned
        .chunks(GROUP_SIZE)
        .map(|chunk| chunk.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join("-")
}
