use crate::models::Configuration;

/** \brief 附加指令段的分隔标记。 */
pub const EXTRA_INSTRUCTIONS_MARKER: &str =
    "ADDITIONAL INSTRUCTIONS (these are instructions about the document, not part of it):";
/** \brief 正文之前的分隔标记。 */
pub const DOCUMENT_MARKER: &str = "DOCUMENT TO EDIT:";

const BASE_RULES: &str = "\
You are a note editor. Rewrite the Markdown note below and return only the edited note.
Rules:
1. Normalize headings: use ATX style (#, ##, ###) with a single space after the hashes and a consistent hierarchy.
2. Normalize list markers: use \"-\" for unordered lists and \"1.\" style for ordered lists.
3. Convert actionable list items (things to do, buy, call, send, fix) into checkbox tasks using \"- [ ] \" syntax.
4. Preserve code blocks, block quotes and inline formatting exactly as written.
5. Never wrap the entire output in a code fence.
6. Never start the response with a horizontal rule (---, ***, ___).
7. Otherwise preserve the content and meaning while improving clarity.";

/**
 * \brief 组装整理用提示词。
 * \details 顺序固定：基础规则 → 标签段 → 附加指令 → 正文标记 → 正文。正文原样追加在末尾。
 */
pub fn build_prompt(body: &str, config: &Configuration) -> String {
    let mut prompt = String::with_capacity(BASE_RULES.len() + body.len() + 256);
    prompt.push_str(BASE_RULES);
    prompt.push_str("\n\n");

    let tags = config.preferred_tags.trim();
    if !tags.is_empty() {
        prompt.push_str(&tag_clause(tags));
        prompt.push_str("\n\n");
    }

    // 附加指令只在判空时 trim，写入时保持原样
    if !config.extra_instructions.trim().is_empty() {
        prompt.push_str(EXTRA_INSTRUCTIONS_MARKER);
        prompt.push('\n');
        prompt.push_str(&config.extra_instructions);
        prompt.push_str("\n\n");
    }

    prompt.push_str(DOCUMENT_MARKER);
    prompt.push('\n');
    prompt.push_str(body);
    prompt
}

fn tag_clause(tags: &str) -> String {
    format!(
        "Tags: annotate matching content anywhere in the document (not only headers) with these tags where they apply: {}",
        tags
    )
}
