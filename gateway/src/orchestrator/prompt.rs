use crate::core::persistence::Persona;

const HEADER: &str =
    "You are role-playing a sales prospect for training. Stay strictly in character.";

const RULES: &[&str] = &[
    "- Respond only in English, even if the user speaks another language.",
    "- Keep replies concise (1-3 sentences), conversational, and realistic.",
    "- Avoid sign-offs like \u{201c}Thanks for watching\u{201d} or social media requests.",
    "- If the user goes off-topic or asks for unrelated actions, steer back to the sales conversation.",
    "- If audio is unclear, briefly ask for clarification instead of inventing content.",
];

/// System prompt for a generation call: persona card, rules, then context.
pub fn build_system_prompt(persona: &Persona, context: &str) -> String {
    let mut lines = Vec::with_capacity(RULES.len() + 4);
    lines.push(HEADER.to_string());
    lines.push(format!("Persona Card: {} ({})", persona.name, persona.role));
    lines.push(format!("Persona Backstory: {}", persona.prompt));
    lines.push("Rules:".to_string());
    lines.extend(RULES.iter().map(|r| r.to_string()));
    format!("{}\n\nContext (may be empty):\n{}", lines.join("\n"), context)
}
