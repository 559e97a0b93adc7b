//! System prompt templates for NPC dialogue.

/// System prompt instructing the backend to roleplay as the given NPC.
pub fn npc_system_prompt(npc_profile: &str) -> String {
    format!(
        "You are a character in a fantasy world. You will respond to questions \
         and engage in dialogue as this character.\n\n\
         {npc_profile}\n\n\
         INSTRUCTIONS:\n\
         - Always respond in character as this NPC\n\
         - Draw upon your backstory and traits when answering\n\
         - Be authentic to your personality, profession, and location\n\
         - Respond conversationally and naturally\n\
         - If asked about something outside your knowledge or experience, stay \
         in character and respond accordingly (e.g., \"I wouldn't know much about that\")"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_is_embedded() {
        let prompt = npc_system_prompt("Character Profile: Aldric");
        assert!(prompt.contains("Character Profile: Aldric"));
        assert!(prompt.contains("respond in character"));
    }
}
