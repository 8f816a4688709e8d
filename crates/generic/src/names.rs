use uuid::Uuid;

const MAX_NAME_LENGTH: usize = 63;
const RANDOM_LENGTH: usize = 5;
const MAX_GENERATED_NAME_LENGTH: usize = MAX_NAME_LENGTH - RANDOM_LENGTH;

// No vowels (avoids accidental words) and no easily confused characters.
const ALPHANUMS: &[u8] = b"bcdfghjklmnpqrstvwxz2456789";

/// Produces a concrete name from a `generateName` base.
pub trait NameGenerator: Send + Sync {
    fn generate_name(&self, base: &str) -> String;
}

/// `base` (truncated) followed by five random characters.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleNameGenerator;

impl NameGenerator for SimpleNameGenerator {
    fn generate_name(&self, base: &str) -> String {
        let mut end = base.len().min(MAX_GENERATED_NAME_LENGTH);
        while !base.is_char_boundary(end) {
            end -= 1;
        }
        let entropy = Uuid::new_v4();
        let suffix: String = entropy.as_bytes()[..RANDOM_LENGTH]
            .iter()
            .map(|b| ALPHANUMS[*b as usize % ALPHANUMS.len()] as char)
            .collect();
        format!("{}{}", &base[..end], suffix)
    }
}
