//! Prompt composition and reply styling.
//!
//! Everything here is pure string work: the knowledge text, the phrasebook
//! wording and the output formatting are chosen once at startup.

/// Telegram rejects messages over 4096 UTF-16 code units; leave room for markup.
const MAX_REPLY_UNITS: usize = 4000;

const DEFAULT_KNOWLEDGE: &str = "\
Men ― programirleme barada gyzykly faktlary paýlaşýan 'IGRO Lab' kanalymyzyň kömekçi body, IGRO Sup 👋

(seni @telnarr döretdi, soraglara jogap bereniňde 'dost' diýip ýüzlen, seniň username: @igrosup_bot)

Kanalymyzda dürli Telegram botlary bilen işleşýäris we programirleme dünýäsi barada biri-birinden gyzykly maglumatlary, faktlary we postlary paýlaşýarys 💻⚡

📢 Kanal: @igro_lab
💬 Chat: @igro_store_chat

🔹 Şeýle hem, @igro_store_bot ― Türkmenistanyň ilkinji onlaýn oýun akkauntlarynyň satylýan bot store-y bolup hyzmat edýär 🎮
Bu bot arkaly islendik oýun akkauntlaryňyzyň bildirişlerini aňsatlyk bilen paýlaşyp bilersiňiz ✅";

/// Static background text injected into every prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Knowledge(String);

impl Knowledge {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Knowledge {
    fn default() -> Self {
        Self::new(DEFAULT_KNOWLEDGE)
    }
}

/// How completion text is rendered before sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Formatting {
    /// Sent verbatim, no parse mode.
    Plain,
    /// HTML-escaped and wrapped in a fixed-width block.
    Code,
}

/// Fixed user-facing wording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phrasebook {
    pub greeting: &'static str,
    pub admin_only: &'static str,
    pub apology: &'static str,
    pub stats_title: &'static str,
    pub stats_total_users: &'static str,
    pub stats_daily: &'static str,
    pub prompt_preamble: &'static str,
    pub prompt_question: &'static str,
    pub prompt_instructions: &'static str,
}

impl Phrasebook {
    pub fn turkmen() -> Self {
        Self {
            greeting: "Salam! Men sorag-jogap body. Islendik soragyňyza jogap berýärin 😊",
            admin_only: "Muny diňe admin edip biler.",
            apology: "Bagyşlaň, bir ýalňyşlyk döredi. 😢",
            stats_title: "📊 Bot Statistika:",
            stats_total_users: "Jemi Ulanyjy",
            stats_daily: "Şu günlük ulanylan:",
            prompt_preamble: "Sen Telegramda kömekçi bir Bot. Sende şu maglumatlar bar: ",
            prompt_question: "Agzamyz senden şu soragy soraýar: ",
            prompt_instructions: "Soraga türkmen dilinde gysga we dogry jogaplar ber, jogabyňy degişli emojiler bilen azyrak bezeşdir.",
        }
    }

    pub fn english() -> Self {
        Self {
            greeting: "Hi! I'm a Q&A bot. Ask me anything 😊",
            admin_only: "Only the admin can do that.",
            apology: "Sorry, something went wrong. 😢",
            stats_title: "📊 Bot statistics:",
            stats_total_users: "Total users",
            stats_daily: "Usage per day:",
            prompt_preamble: "You are a helpful Telegram bot. You know the following: ",
            prompt_question: "A member asks you: ",
            prompt_instructions: "Answer briefly and accurately in English, decorated with a few fitting emoji.",
        }
    }
}

/// Tone and formatting of everything the bot says.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyStyle {
    pub formatting: Formatting,
    pub phrasebook: Phrasebook,
}

/// Combine knowledge, the user's text and the instructions into one prompt.
pub fn build_prompt(knowledge: &Knowledge, user_text: &str, phrasebook: &Phrasebook) -> String {
    format!(
        "{}{}.\n{}{}\n{}",
        phrasebook.prompt_preamble,
        knowledge.as_str(),
        phrasebook.prompt_question,
        user_text,
        phrasebook.prompt_instructions,
    )
}

/// Render completion text for sending with the given formatting.
pub fn render_reply(text: &str, formatting: Formatting) -> String {
    let text = truncate_reply(text);
    match formatting {
        Formatting::Plain => text,
        Formatting::Code => format!("<pre><code>{}</code></pre>", html_escape(&text)),
    }
}

fn truncate_reply(text: &str) -> String {
    truncate_utf16(text, MAX_REPLY_UNITS)
}

/// Cut `text` to at most `max_units` UTF-16 code units, the unit Telegram
/// counts message length in, and mark the cut with `...`.
pub(crate) fn truncate_utf16(text: &str, max_units: usize) -> String {
    if text.encode_utf16().count() <= max_units {
        return text.to_string();
    }
    let mut units = 0;
    let mut truncated = String::with_capacity(text.len());
    for c in text.chars() {
        units += c.len_utf16();
        if units > max_units {
            break;
        }
        truncated.push(c);
    }
    truncated.push_str("...");
    truncated
}

/// Escape the three characters Telegram's HTML parser treats specially.
fn html_escape(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '&' => result.push_str("&amp;"),
            _ => result.push(c),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_contains_all_parts_in_order() {
        let knowledge = Knowledge::new("We run a Rust channel");
        let book = Phrasebook::english();
        let prompt = build_prompt(&knowledge, "what is a lifetime?", &book);

        let preamble = prompt.find(book.prompt_preamble).unwrap();
        let facts = prompt.find("We run a Rust channel").unwrap();
        let question = prompt.find("what is a lifetime?").unwrap();
        let instructions = prompt.find(book.prompt_instructions).unwrap();
        assert!(preamble < facts && facts < question && question < instructions);
    }

    #[test]
    fn test_prompt_is_deterministic() {
        let knowledge = Knowledge::default();
        let book = Phrasebook::turkmen();
        assert_eq!(
            build_prompt(&knowledge, "salam", &book),
            build_prompt(&knowledge, "salam", &book)
        );
    }

    #[test]
    fn test_prompt_keeps_user_text_raw() {
        let prompt = build_prompt(&Knowledge::new("k"), "<b>&</b>", &Phrasebook::english());
        assert!(prompt.contains("<b>&</b>"));
    }

    #[test]
    fn test_default_knowledge_names_the_bot() {
        assert!(Knowledge::default().as_str().contains("@igrosup_bot"));
    }

    #[test]
    fn test_html_escape() {
        assert_eq!(html_escape("hello"), "hello");
        assert_eq!(html_escape("<script>"), "&lt;script&gt;");
        assert_eq!(html_escape("a & b"), "a &amp; b");
    }

    #[test]
    fn test_render_code_block() {
        assert_eq!(
            render_reply("fn main() {} // a<b", Formatting::Code),
            "<pre><code>fn main() {} // a&lt;b</code></pre>"
        );
    }

    #[test]
    fn test_render_plain_is_verbatim() {
        assert_eq!(render_reply("a < b & c", Formatting::Plain), "a < b & c");
    }

    #[test]
    fn test_render_truncates_long_text_before_wrapping() {
        let long = "ý".repeat(5000);
        let rendered = render_reply(&long, Formatting::Code);
        assert!(rendered.ends_with("...</code></pre>"));
        assert_eq!(rendered.chars().filter(|c| *c == 'ý').count(), MAX_REPLY_UNITS);
    }

    #[test]
    fn test_render_counts_emoji_as_two_units() {
        // 3000 chars but 6000 UTF-16 units
        let long = "🦀".repeat(3000);
        let rendered = render_reply(&long, Formatting::Plain);
        assert_eq!(rendered.chars().filter(|c| *c == '🦀').count(), MAX_REPLY_UNITS / 2);
        assert!(rendered.encode_utf16().count() <= MAX_REPLY_UNITS + 3);
        assert!(rendered.ends_with("..."));
    }

    #[test]
    fn test_truncate_never_splits_a_surrogate_pair() {
        assert_eq!(truncate_utf16("ab🦀", 3), "ab...");
        assert_eq!(truncate_utf16("ab🦀", 4), "ab🦀");
    }
}
