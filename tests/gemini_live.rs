//! Live smoke test against the Gemini API.
//!
//! Requires GEMINI_API_KEY in the environment.
//!
//! Run with: cargo test --features integ_test --test gemini_live

#[cfg(feature = "integ_test")]
mod tests {
    use std::time::Duration;

    use igrosup::chatbot::prompt::{Knowledge, Phrasebook, build_prompt};
    use igrosup::chatbot::{Completion, GeminiClient};

    fn api_key() -> Option<String> {
        std::env::var("GEMINI_API_KEY").ok().filter(|k| !k.is_empty())
    }

    fn model() -> String {
        std::env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-1.5-flash".to_string())
    }

    #[tokio::test]
    async fn test_generate_answers_prompt() {
        let Some(key) = api_key() else {
            eprintln!("Skipping test: GEMINI_API_KEY not set");
            return;
        };

        let client = GeminiClient::new(key, model(), Duration::from_secs(60)).expect("client");
        let prompt = build_prompt(
            &Knowledge::new("You help members of a programming channel."),
            "In one word, which language has a borrow checker?",
            &Phrasebook::english(),
        );

        let answer = client.generate(&prompt).await.expect("completion");
        assert!(!answer.trim().is_empty());
    }

    #[tokio::test]
    async fn test_bad_key_is_api_error() {
        if api_key().is_none() {
            eprintln!("Skipping test: GEMINI_API_KEY not set");
            return;
        }

        let client = GeminiClient::new("invalid".into(), model(), Duration::from_secs(30)).expect("client");
        let result = client.generate("hello").await;
        assert!(result.is_err());
    }
}
