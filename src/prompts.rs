//! Prompt templates for each conversation phase.
//!
//! Templates are compiled once into a minijinja environment. Rendering is a
//! pure function of its inputs, so the same state, settings and catalog always
//! produce the same prompt.

use minijinja::{context, Environment};

use crate::catalog::BlockEntry;
use crate::llm_interaction::{ChatMessage, Prompt};

const CLARIFICATION_SYSTEM: &str = r#"You are a requirements-clarification assistant.
Language for output: English.

Evaluate the user's business request and their answers so far against the technical checks provided by the administrator.

- If some checks are not yet covered, list which checks are missing and ask targeted follow-up questions. Do not mention the readiness token.
- If every check is covered, briefly confirm that the requirement is complete and that we will move on to the functional design, then end your reply with a final line containing exactly: {{ marker }}"#;

const CLARIFICATION_AUX: &str = r#"Technical checks provided by the administrator:
---
{{ checks }}
---"#;

const DESIGN_SYSTEM: &str = r#"You are a functional solution architect.
Language for output: English.

Using the business request and the clarifications in the conversation, produce a functional system design with:
1) Ordered functional capabilities
2) Logical execution flow
3) Main data/integration touchpoints
4) Assumptions

Do not reference any catalog blocks yet.

End with: "If this design looks good, reply CONFIRMED. Otherwise, provide requested changes.""#;

const BLOCKS_SYSTEM: &str = r#"You are a solution design assistant.
Language for output: English.

The conversation contains the business request, its clarifications, the functional design proposal and the user's feedback on it (CONFIRMED or requested changes). Incorporate any requested changes before selecting blocks; the latest feedback takes precedence.

Create a proposal with these sections:
1) Final interpreted requirement
2) Recommended blocks from the catalog (only relevant ones)
3) Suggested implementation sequence
4) Missing capabilities not covered by the listed blocks
5) Optional extra blocks/capabilities to add"#;

const BLOCKS_AUX: &str = r#"Available blocks from the catalog:
---
{% for block in blocks -%}
- {{ block.block_name }}: {{ block.functionality_description }}
{% else -%}
(No blocks available in the catalog.)
{% endfor -%}
---"#;

const DESIGN_REQUEST: &str = r#"Main requirement (first user request):
---
{{ base_request }}
---"#;

const CLARIFICATION_TEMPERATURE: f32 = 0.2;
const DESIGN_TEMPERATURE: f32 = 0.25;
const BLOCKS_TEMPERATURE: f32 = 0.3;

pub struct PromptTemplates {
    env: Environment<'static>,
}

impl PromptTemplates {
    pub fn new() -> Result<Self, minijinja::Error> {
        let mut env = Environment::new();
        env.add_template("clarification_system.txt", CLARIFICATION_SYSTEM)?;
        env.add_template("clarification_aux.txt", CLARIFICATION_AUX)?;
        env.add_template("design_system.txt", DESIGN_SYSTEM)?;
        env.add_template("design_request.txt", DESIGN_REQUEST)?;
        env.add_template("blocks_system.txt", BLOCKS_SYSTEM)?;
        env.add_template("blocks_aux.txt", BLOCKS_AUX)?;
        Ok(Self { env })
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<String, minijinja::Error> {
        self.env.get_template(name)?.render(ctx)
    }

    /// Ask the model whether the clarification turns satisfy the technical checks.
    pub fn clarification(
        &self,
        marker: &str,
        technical_checks: &str,
        turns: &[ChatMessage],
    ) -> Result<Prompt, minijinja::Error> {
        Ok(Prompt {
            system: self.render("clarification_system.txt", context! { marker => marker })?,
            context: turns.to_vec(),
            auxiliary: Some(self.render(
                "clarification_aux.txt",
                context! { checks => technical_checks.trim() },
            )?),
            temperature: CLARIFICATION_TEMPERATURE,
        })
    }

    /// Ask for a functional design built from the clarified request.
    pub fn design_proposal(
        &self,
        base_request: &str,
        turns: &[ChatMessage],
    ) -> Result<Prompt, minijinja::Error> {
        let mut messages = Vec::with_capacity(turns.len() + 1);
        messages.push(ChatMessage::user(self.render(
            "design_request.txt",
            context! { base_request => base_request },
        )?));
        messages.extend(turns.iter().cloned());
        Ok(Prompt {
            system: self.render("design_system.txt", context! {})?,
            context: messages,
            auxiliary: None,
            temperature: DESIGN_TEMPERATURE,
        })
    }

    /// Ask for block recommendations against the proposal and the user's feedback.
    pub fn block_recommendation(
        &self,
        base_request: &str,
        turns: &[ChatMessage],
        design_proposal: &str,
        feedback: &[String],
        blocks: &[BlockEntry],
    ) -> Result<Prompt, minijinja::Error> {
        let mut messages = Vec::with_capacity(turns.len() + feedback.len() + 2);
        messages.push(ChatMessage::user(self.render(
            "design_request.txt",
            context! { base_request => base_request },
        )?));
        messages.extend(turns.iter().cloned());
        messages.push(ChatMessage::assistant(design_proposal));
        messages.extend(feedback.iter().map(|f| ChatMessage::user(f.as_str())));

        let listed: Vec<BlockEntry> = blocks
            .iter()
            .filter(|b| !b.block_name.trim().is_empty())
            .map(|b| BlockEntry::new(b.block_name.trim(), b.functionality_description.trim()))
            .collect();

        Ok(Prompt {
            system: self.render("blocks_system.txt", context! {})?,
            context: messages,
            auxiliary: Some(self.render("blocks_aux.txt", context! { blocks => listed })?),
            temperature: BLOCKS_TEMPERATURE,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn templates() -> PromptTemplates {
        PromptTemplates::new().unwrap()
    }

    #[test]
    fn test_clarification_prompt_carries_marker_and_checks() {
        let turns = vec![ChatMessage::user("We need an online store")];
        let prompt = templates()
            .clarification("READY_FOR_DESIGN", "  Which payment provider?\n", &turns)
            .unwrap();

        assert!(prompt.system.ends_with("READY_FOR_DESIGN"));
        let aux = prompt.auxiliary.unwrap();
        assert!(aux.contains("---\nWhich payment provider?\n---"));
        assert_eq!(prompt.context, turns);
        assert_eq!(prompt.temperature, 0.2);
    }

    #[test]
    fn test_design_prompt_has_no_auxiliary_data() {
        let turns = vec![ChatMessage::user("store"), ChatMessage::assistant("Which country?")];
        let prompt = templates().design_proposal("store", &turns).unwrap();

        assert!(prompt.auxiliary.is_none());
        assert_eq!(prompt.context.len(), 3);
        assert!(prompt.context[0].content.contains("---\nstore\n---"));
        assert!(prompt.system.contains("functional system design"));
    }

    #[test]
    fn test_block_prompt_lists_catalog_and_skips_blank_names() {
        let blocks = vec![
            BlockEntry::new(" cart ", " Shopping cart "),
            BlockEntry::new("", "orphan description"),
            BlockEntry::new("checkout", "Order placement"),
        ];
        let prompt = templates()
            .block_recommendation(
                "store",
                &[ChatMessage::user("store")],
                "Design v1",
                &["Add loyalty points".to_string()],
                &blocks,
            )
            .unwrap();

        let aux = prompt.auxiliary.unwrap();
        assert!(aux.contains("- cart: Shopping cart\n- checkout: Order placement\n"));
        assert!(!aux.contains("orphan"));
        let last_two: Vec<_> = prompt.context.iter().rev().take(2).collect();
        assert_eq!(last_two[0], &ChatMessage::user("Add loyalty points"));
        assert_eq!(last_two[1], &ChatMessage::assistant("Design v1"));
    }

    #[test]
    fn test_block_prompt_notes_empty_catalog() {
        let prompt = templates()
            .block_recommendation("store", &[], "Design v1", &[], &[])
            .unwrap();
        assert!(prompt
            .auxiliary
            .unwrap()
            .contains("(No blocks available in the catalog.)"));
    }

    #[test]
    fn test_assembly_is_deterministic() {
        let blocks = vec![BlockEntry::new("cart", "Shopping cart")];
        let turns = vec![ChatMessage::user("store"), ChatMessage::assistant("Q?")];
        let a = templates()
            .block_recommendation("store", &turns, "D", &["ok".into()], &blocks)
            .unwrap();
        let b = templates()
            .block_recommendation("store", &turns, "D", &["ok".into()], &blocks)
            .unwrap();
        assert_eq!(a, b);
    }
}
