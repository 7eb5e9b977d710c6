use relay_core::ToolSpec;

const DEFAULT_PREAMBLE: &str = "You are Relay, an autonomous agent that completes tasks by calling tools.";

/// Build the system message seeded into every fresh conversation.
pub fn build_system_prompt(preamble: Option<&str>, tools: &[ToolSpec], reserved: &[ToolSpec]) -> String {
    let mut prompt = String::new();
    prompt.push_str(preamble.unwrap_or(DEFAULT_PREAMBLE).trim());
    prompt.push_str(
        "\n\n# Calling tools\n\n\
         Call a tool by writing its tag, with each parameter as a nested tag:\n\
         <toolName><param>value</param></toolName>\n\
         Wrap values containing markup in <![CDATA[...]]>.\n\
         Call at most one tool per response and wait for its result.\n\
         Every response must end with a tool call, <completionResult> or <askFollowupQuestion>.\n",
    );

    if !tools.is_empty() {
        prompt.push_str("\n# Tools\n");
        for spec in tools {
            push_spec(&mut prompt, spec);
        }
    }

    prompt.push_str("\n# Control tags\n");
    for spec in reserved {
        push_spec(&mut prompt, spec);
    }
    prompt
}

fn push_spec(prompt: &mut String, spec: &ToolSpec) {
    prompt.push_str(&format!("\n## {}\n{}\n", spec.name, spec.description));
    for param in &spec.params {
        param.walk(&mut |p| {
            if !p.description.is_empty() {
                let required = if p.optional { "optional" } else { "required" };
                prompt.push_str(&format!("- {} ({required}): {}\n", p.name, p.description));
            }
        });
    }
    if !spec.usage.is_empty() {
        prompt.push_str("Usage:\n");
        prompt.push_str(&spec.usage);
        prompt.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::reserved_specs;
    use relay_core::ParamDefinition;

    #[test]
    fn test_prompt_lists_tools_and_control_tags() {
        let bash = ToolSpec::new("bash", "Run a shell command.")
            .with_usage("<bash><command>ls</command></bash>")
            .with_params(vec![ParamDefinition::required("command").describe("The command line")]);
        let prompt = build_system_prompt(None, &[bash], &reserved_specs());
        assert!(prompt.starts_with(DEFAULT_PREAMBLE));
        assert!(prompt.contains("## bash"));
        assert!(prompt.contains("- command (required): The command line"));
        assert!(prompt.contains("## completionResult"));
        assert!(prompt.contains("## askFollowupQuestion"));
    }

    #[test]
    fn test_custom_preamble() {
        let prompt = build_system_prompt(Some("Be terse."), &[], &reserved_specs());
        assert!(prompt.starts_with("Be terse."));
        assert!(!prompt.contains("# Tools"));
    }
}
