use rand::{distr::Alphanumeric, rng, Rng};

pub mod crypto;
pub mod limit;
pub mod sse;
pub mod ssrf;

pub fn random_alphanumeric(len: usize) -> String {
    rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

pub fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len.div_ceil(2)];
    rng().fill(bytes.as_mut_slice());
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in &bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out.truncate(len);
    out
}

/// Request identifier minted at ingress and propagated upstream and into logs.
pub fn generate_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Completion id in the OpenAI wire format.
pub fn generate_chat_id() -> String {
    format!("chatcmpl-{}", random_hex(24))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_hex_length_and_charset() {
        let id = random_hex(24);
        assert_eq!(id.len(), 24);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_chat_id_shape() {
        let id = generate_chat_id();
        assert!(id.starts_with("chatcmpl-"));
        assert_eq!(id.len(), "chatcmpl-".len() + 24);
    }
}
