// Shared prompt fragments.
// Each pipeline that drives the model keeps its own prompts.rs alongside it;
// this file only holds the cross-cutting pieces.

/// Writing style enforced on every generated document.
pub const STYLE_INSTRUCTION: &str = "\
    Write everything in professional, concise English. No emojis. \
    Never invent employers, dates or credentials that are not in the résumé.";

/// Common field contract for every template family.
pub const FIELD_CONTRACT: &str = "\
    Build the following structure:\n\
    • SUMMARY: 4–6 lines focused on recruitment highlights.\n\
    • SKILLS: one comma-separated string with the top technologies (deduplicate by case-insensitive label).\n\
    • LANGUAGES_LINES: one bullet per line, e.g. \"• English (Intermediate)\\n• Spanish (Native)\".\n\
    • INDUSTRIES_LINES: one bullet per line, e.g. \"• Fintech\\n• Retail\".\n\
    • EDUCATION: array of { institution, degree, period }.\n\
    • EXPERIENCE: chronological array of { role, company, period, location, summary, bullets, tech }.\n\
    • NAME and ROLE if you can infer them; otherwise empty strings.\n\
    Leave missing information as empty strings or empty arrays.";

/// Reminder appended when a turn produced no tool call.
pub fn tool_reminder(tool: &str) -> String {
    format!(
        "Remember to call {tool} with all required fields before giving a final answer."
    )
}
