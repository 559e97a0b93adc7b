//! NPC character profile and the routing context derived from it.

use serde::{Deserialize, Serialize};

/// A non-player character the pipeline speaks as.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NpcProfile {
    pub name: String,
    pub age: u32,
    pub location: String,
    pub profession: String,
    pub traits: Vec<String>,
    pub childhood_backstory: String,
    pub adult_backstory: String,
}

impl NpcProfile {
    /// Format the profile as a single text block for LLM input.
    pub fn prompt_text(&self) -> String {
        format!(
            "Character Profile: {}\n\n\
             Age: {}\n\
             Location: {}\n\
             Profession: {}\n\
             Traits: {}\n\n\
             Childhood Backstory:\n{}\n\n\
             Adult Backstory:\n{}",
            self.name,
            self.age,
            self.location,
            self.profession,
            self.traits.join(", "),
            self.childhood_backstory,
            self.adult_backstory
        )
    }
}

/// Read-only NPC context fed to query routing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NpcContext {
    pub npc_id: String,
    pub npc_name: String,
    pub npc_location: String,
    pub world_date: String,
}

impl NpcContext {
    /// Derive the routing context from a profile.
    pub fn from_profile(npc: &NpcProfile) -> Self {
        Self {
            npc_id: npc.name.to_lowercase().replace(' ', "_"),
            npc_name: npc.name.clone(),
            npc_location: npc.location.clone(),
            world_date: String::new(),
        }
    }
}
