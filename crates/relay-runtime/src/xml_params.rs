//! Tag markup → schema-validated parameter trees.
//!
//! Parsing a span is two steps. [`complete_partial_xml`] closes whatever a
//! truncated stream left open, then [`ParamParser::parse`] builds a generic tree
//! with `quick-xml` and runs [`map_and_validate_params`] against the tool's
//! declared parameters.
//!
//! Leaf parameters are stop nodes: their bodies are taken verbatim (CDATA
//! unwrapped) and never parsed as structure, so `<command>echo <b></command>`
//! yields the string `echo <b>`.

use std::collections::HashSet;

use quick_xml::events::Event;
use regex::Regex;
use relay_core::{ParamDefinition, RelayError, Result, ToolSpec};
use serde_json::{Map, Value};

const CDATA_OPEN: &str = "<![CDATA[";
const CDATA_CLOSE: &str = "]]>";

/// How strictly required parameters are enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    /// Streaming: absent parameters are skipped.
    Partial,
    /// Complete span: absent required parameters are an error.
    Final,
}

/// Close a possibly truncated tag document.
///
/// An unterminated CDATA section is dropped, a dangling `<...` is cut off, and
/// every known tag still open is closed in LIFO order. Unknown tags are text.
pub fn complete_partial_xml(text: &str, tag_pattern: &Regex) -> String {
    let mut doc = text;

    if let Some(open) = doc.rfind(CDATA_OPEN)
        && !doc[open..].contains(CDATA_CLOSE)
    {
        doc = &doc[..open];
    }

    if let Some(lt) = doc.rfind('<')
        && doc.rfind('>').is_none_or(|gt| gt < lt)
    {
        doc = &doc[..lt];
    }

    let mut stack: Vec<&str> = Vec::new();
    for caps in tag_pattern.captures_iter(doc) {
        let closing = !caps[1].is_empty();
        let Some(name) = caps.get(2).map(|m| m.as_str()) else {
            continue;
        };
        if closing {
            if stack.last() == Some(&name) {
                stack.pop();
            }
        } else {
            stack.push(name);
        }
    }

    let mut completed = doc.to_string();
    for name in stack.iter().rev() {
        completed.push_str("</");
        completed.push_str(name);
        completed.push('>');
    }
    completed
}

/// Build the `<(/?)(a|b|...)>` pattern used to find known tags.
pub fn known_tag_pattern<'a>(names: impl IntoIterator<Item = &'a str>) -> Result<Regex> {
    let mut names: Vec<&str> = names.into_iter().collect();
    names.sort_unstable_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
    names.dedup();
    let alternation = names
        .iter()
        .map(|n| regex::escape(n))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!("<(/?)({alternation})>"))
        .map_err(|e| RelayError::Parse(format!("bad tag pattern: {e}")))
}

/// Map a generic tree onto declared parameters.
///
/// Undeclared fields are dropped. Array parameters accept either a single
/// element or several. In [`ParseMode::Final`] every missing required parameter
/// is collected and reported in one [`RelayError::MissingParameters`].
pub fn map_and_validate_params(
    raw: &Value,
    params: &[ParamDefinition],
    mode: ParseMode,
) -> Result<Value> {
    let mut missing = Vec::new();
    let mapped = map_object(raw, params, mode, "", &mut missing)?;
    if !missing.is_empty() {
        return Err(RelayError::MissingParameters(missing));
    }
    Ok(mapped)
}

fn map_object(
    raw: &Value,
    params: &[ParamDefinition],
    mode: ParseMode,
    prefix: &str,
    missing: &mut Vec<String>,
) -> Result<Value> {
    let mut out = Map::new();
    for def in params {
        let path = if prefix.is_empty() {
            def.name.clone()
        } else {
            format!("{prefix}.{}", def.name)
        };

        let value = match raw.get(&def.name) {
            Some(v) if !is_absent(v) => v,
            _ => {
                if !def.optional && mode == ParseMode::Final {
                    missing.push(path);
                }
                continue;
            }
        };

        let mapped = if def.is_array() {
            let [element] = def.children.as_slice() else {
                return Err(RelayError::Parse(format!(
                    "array parameter '{path}' must declare exactly one element"
                )));
            };
            let items = as_list(value.get(&element.name));
            let element_path = format!("{path}.{}", element.name);
            let mut list = Vec::with_capacity(items.len());
            for item in items {
                if element.is_leaf() {
                    list.push(item.clone());
                } else {
                    list.push(map_object(item, &element.children, mode, &element_path, missing)?);
                }
            }
            Value::Array(list)
        } else if !def.is_leaf() {
            map_object(value, &def.children, mode, &path, missing)?
        } else {
            value.clone()
        };
        out.insert(def.name.clone(), mapped);
    }
    Ok(Value::Object(out))
}

fn is_absent(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// The generic tree cannot tell one child from a list of one.
fn as_list(value: Option<&Value>) -> Vec<&Value> {
    match value {
        None | Some(Value::Null) => vec![],
        Some(Value::Array(items)) => items.iter().collect(),
        Some(Value::String(s)) if s.is_empty() => vec![],
        Some(other) => vec![other],
    }
}

/// Dotted paths of every leaf reachable from `spec`, rooted at the tool name.
pub fn stop_paths(spec: &ToolSpec) -> HashSet<String> {
    fn collect(prefix: &str, def: &ParamDefinition, out: &mut HashSet<String>) {
        let path = format!("{prefix}.{}", def.name);
        if def.is_leaf() {
            out.insert(path);
        } else {
            for child in &def.children {
                collect(&path, child, out);
            }
        }
    }
    let mut out = HashSet::new();
    for def in &spec.params {
        collect(&spec.name, def, &mut out);
    }
    out
}

/// Parses tag spans for a fixed universe of known tags.
#[derive(Debug, Clone)]
pub struct ParamParser {
    tag_pattern: Regex,
}

impl ParamParser {
    /// `specs` is every tool the runtime knows plus the reserved tags; all tool
    /// names and every declared parameter name become known tags.
    pub fn new<'a>(specs: impl IntoIterator<Item = &'a ToolSpec>) -> Result<Self> {
        let mut names: Vec<&str> = Vec::new();
        for spec in specs {
            names.push(spec.name.as_str());
            names.extend(spec.param_names());
        }
        Ok(Self {
            tag_pattern: known_tag_pattern(names)?,
        })
    }

    pub fn tag_pattern(&self) -> &Regex {
        &self.tag_pattern
    }

    pub fn complete(&self, text: &str) -> String {
        complete_partial_xml(text, &self.tag_pattern)
    }

    /// Complete, parse and validate one span of `spec`'s tag.
    ///
    /// Returns the parameter object. When the tag body has no structure at all
    /// (`<completionResult>done</completionResult>`) the object is empty and the
    /// raw body is available through [`inner_text`].
    pub fn parse(&self, span: &str, spec: &ToolSpec, mode: ParseMode) -> Result<Value> {
        let completed = self.complete(span);
        let normalized = self.normalize(&completed, &stop_paths(spec));
        let tree = build_tree(&normalized)?;
        let root = tree.get(&spec.name).cloned().unwrap_or(Value::Null);
        map_and_validate_params(&root, &spec.params, mode)
    }

    /// Rewrite a completed document so that only known tags remain markup:
    /// text between tags is escaped, stop-node bodies are escaped verbatim, and
    /// closing tags that do not match the innermost open tag are dropped.
    fn normalize(&self, doc: &str, stops: &HashSet<String>) -> String {
        let mut out = String::with_capacity(doc.len() + 16);
        let mut stack: Vec<&str> = Vec::new();
        let mut cursor = 0;

        while let Some(caps) = self.tag_pattern.captures_at(doc, cursor) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(2)) else {
                break;
            };
            let name = name.as_str();
            out.push_str(&quick_xml::escape::escape(&doc[cursor..whole.start()]));
            cursor = whole.end();

            if !caps[1].is_empty() {
                if stack.last() == Some(&name) {
                    stack.pop();
                    out.push_str(whole.as_str());
                }
                continue;
            }

            let path = if stack.is_empty() {
                name.to_string()
            } else {
                format!("{}.{name}", stack.join("."))
            };
            if stops.contains(&path) {
                let end_label = format!("</{name}>");
                let (body, next) = match doc[cursor..].find(&end_label) {
                    Some(rel) => (&doc[cursor..cursor + rel], cursor + rel + end_label.len()),
                    None => (&doc[cursor..], doc.len()),
                };
                out.push_str(whole.as_str());
                out.push_str(&quick_xml::escape::escape(unwrap_cdata(body)));
                out.push_str(&end_label);
                cursor = next;
            } else {
                stack.push(name);
                out.push_str(whole.as_str());
            }
        }
        out.push_str(&quick_xml::escape::escape(&doc[cursor..]));
        for name in stack.iter().rev() {
            out.push_str(&format!("</{name}>"));
        }
        out
    }
}

fn unwrap_cdata(body: &str) -> &str {
    let trimmed = body.trim();
    trimmed
        .strip_prefix(CDATA_OPEN)
        .and_then(|rest| rest.strip_suffix(CDATA_CLOSE))
        .unwrap_or(body)
}

/// Body of a `<name>...</name>` span with the outer labels removed.
pub fn inner_text<'a>(span: &'a str, name: &str) -> &'a str {
    let start = format!("<{name}>");
    let end = format!("</{name}>");
    let body = span.strip_prefix(start.as_str()).unwrap_or(span);
    let body = body.strip_suffix(end.as_str()).unwrap_or(body);
    unwrap_cdata(body).trim()
}

/// Generic element tree: text-only elements become strings, elements with
/// children become objects, repeated siblings become arrays.
fn build_tree(xml: &str) -> Result<Value> {
    struct Frame {
        name: String,
        children: Map<String, Value>,
        text: String,
    }

    let mut reader = quick_xml::Reader::from_str(xml);
    let mut stack = vec![Frame {
        name: String::new(),
        children: Map::new(),
        text: String::new(),
    }];

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => stack.push(Frame {
                name: String::from_utf8_lossy(e.name().as_ref()).into_owned(),
                children: Map::new(),
                text: String::new(),
            }),
            Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if let Some(top) = stack.last_mut() {
                    insert_child(&mut top.children, name, Value::String(String::new()));
                }
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| RelayError::Parse(e.to_string()))?;
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text);
                }
            }
            Ok(Event::CData(c)) => {
                let text = String::from_utf8_lossy(&c.into_inner()).into_owned();
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text);
                }
            }
            Ok(Event::End(_)) => {
                if stack.len() < 2 {
                    return Err(RelayError::Parse("unbalanced closing tag".into()));
                }
                let Some(frame) = stack.pop() else { break };
                let value = if frame.children.is_empty() {
                    Value::String(frame.text.trim().to_string())
                } else {
                    Value::Object(frame.children)
                };
                if let Some(parent) = stack.last_mut() {
                    insert_child(&mut parent.children, frame.name, value);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(RelayError::Parse(e.to_string())),
            _ => {}
        }
    }

    let root = stack.into_iter().next().map(|f| f.children).unwrap_or_default();
    Ok(Value::Object(root))
}

fn insert_child(children: &mut Map<String, Value>, name: String, value: Value) {
    match children.get_mut(&name) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            children.insert(name, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bash_spec() -> ToolSpec {
        ToolSpec::new("bash", "run a command").with_params(vec![ParamDefinition::required("command")])
    }

    fn assign_spec() -> ToolSpec {
        ToolSpec::new("assignTasks", "fan out").with_params(vec![
            ParamDefinition::required("tasks").array_of(ParamDefinition::required("task").object(
                vec![
                    ParamDefinition::required("prompt"),
                    ParamDefinition::optional("tools")
                        .array_of(ParamDefinition::required("tool")),
                ],
            )),
        ])
    }

    fn write_spec() -> ToolSpec {
        ToolSpec::new("writeFile", "write").with_params(vec![
            ParamDefinition::required("path"),
            ParamDefinition::required("content"),
        ])
    }

    fn parser() -> ParamParser {
        let specs = [bash_spec(), assign_spec(), write_spec()];
        ParamParser::new(specs.iter()).unwrap()
    }

    #[test]
    fn test_complete_closes_open_tags_lifo() {
        let p = parser();
        assert_eq!(
            p.complete("<assignTasks><tasks><task><prompt>do it"),
            "<assignTasks><tasks><task><prompt>do it</prompt></task></tasks></assignTasks>"
        );
    }

    #[test]
    fn test_complete_drops_dangling_tag_start() {
        let p = parser();
        assert_eq!(p.complete("<bash><command>ls</comm"), "<bash><command>ls</command></bash>");
    }

    #[test]
    fn test_complete_drops_unterminated_cdata() {
        let p = parser();
        assert_eq!(
            p.complete("<writeFile><content><![CDATA[half a fi"),
            "<writeFile><content></content></writeFile>"
        );
    }

    #[test]
    fn test_complete_ignores_unknown_tags() {
        let p = parser();
        assert_eq!(p.complete("<bash><command><div>x"), "<bash><command><div>x</command></bash>");
    }

    #[test]
    fn test_parse_leaf_keeps_markup_verbatim() {
        let p = parser();
        let params = p
            .parse(
                "<writeFile><path>a.html</path><content><p class=\"x\">a & b</p></content></writeFile>",
                &write_spec(),
                ParseMode::Final,
            )
            .unwrap();
        assert_eq!(params["content"], "<p class=\"x\">a & b</p>");
    }

    #[test]
    fn test_parse_leaf_containing_known_tag_name() {
        let p = parser();
        let params = p
            .parse(
                "<writeFile><path>notes.md</path><content>use <command> here</content></writeFile>",
                &write_spec(),
                ParseMode::Final,
            )
            .unwrap();
        assert_eq!(params["content"], "use <command> here");
    }

    #[test]
    fn test_parse_unwraps_cdata() {
        let p = parser();
        let params = p
            .parse(
                "<writeFile><path>x</path><content><![CDATA[if a < b {}]]></content></writeFile>",
                &write_spec(),
                ParseMode::Final,
            )
            .unwrap();
        assert_eq!(params["content"], "if a < b {}");
    }

    #[test]
    fn test_array_normalization_single_and_many() {
        let p = parser();
        let one = p
            .parse(
                "<assignTasks><tasks><task><prompt>a</prompt></task></tasks></assignTasks>",
                &assign_spec(),
                ParseMode::Final,
            )
            .unwrap();
        let two = p
            .parse(
                "<assignTasks><tasks><task><prompt>a</prompt></task><task><prompt>b</prompt></task></tasks></assignTasks>",
                &assign_spec(),
                ParseMode::Final,
            )
            .unwrap();
        assert_eq!(one["tasks"], json!([{ "prompt": "a" }]));
        assert_eq!(two["tasks"], json!([{ "prompt": "a" }, { "prompt": "b" }]));
    }

    #[test]
    fn test_nested_leaf_array() {
        let p = parser();
        let params = p
            .parse(
                "<assignTasks><tasks><task><prompt>a</prompt><tools><tool>bash</tool></tools></task></tasks></assignTasks>",
                &assign_spec(),
                ParseMode::Final,
            )
            .unwrap();
        assert_eq!(params["tasks"][0]["tools"], json!(["bash"]));
    }

    #[test]
    fn test_undeclared_fields_are_dropped() {
        let raw = json!({ "command": "ls", "sudo": "yes" });
        let mapped =
            map_and_validate_params(&raw, &bash_spec().params, ParseMode::Final).unwrap();
        assert_eq!(mapped, json!({ "command": "ls" }));
    }

    #[test]
    fn test_missing_required_aggregated_once() {
        let p = parser();
        let err = p
            .parse("<writeFile></writeFile>", &write_spec(), ParseMode::Final)
            .unwrap_err();
        match err {
            RelayError::MissingParameters(names) => {
                assert_eq!(names, vec!["path".to_string(), "content".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_nested_names_full_path() {
        let p = parser();
        let err = p
            .parse(
                "<assignTasks><tasks><task><tools><tool>bash</tool></tools></task></tasks></assignTasks>",
                &assign_spec(),
                ParseMode::Final,
            )
            .unwrap_err();
        assert_eq!(err.to_string(), "missing required parameters: [tasks.task.prompt]");
    }

    #[test]
    fn test_partial_mode_skips_missing() {
        let p = parser();
        let params = p
            .parse("<writeFile><path>a.txt</pa", &write_spec(), ParseMode::Partial)
            .unwrap();
        assert_eq!(params, json!({ "path": "a.txt" }));
    }

    #[test]
    fn test_partial_tolerance_over_every_prefix() {
        let p = parser();
        let doc = "<assignTasks><tasks><task><prompt>list <b>files</b></prompt><tools><tool>bash</tool></tools></task><task><prompt>b</prompt></task></tasks></assignTasks>";
        for end in 0..=doc.len() {
            let prefix = &doc[..end];
            let params = p.parse(prefix, &assign_spec(), ParseMode::Partial);
            assert!(params.is_ok(), "prefix {prefix:?} failed: {params:?}");
        }
        let full = p.parse(doc, &assign_spec(), ParseMode::Partial).unwrap();
        assert_eq!(full["tasks"][0]["prompt"], "list <b>files</b>");
        assert_eq!(full["tasks"][1]["prompt"], "b");
    }

    #[test]
    fn test_partial_prefix_recovers_present_leaf() {
        let p = parser();
        let params = p
            .parse("<bash><command>ls -l", &bash_spec(), ParseMode::Partial)
            .unwrap();
        assert_eq!(params["command"], "ls -l");
    }

    #[test]
    fn test_stray_closing_tag_is_ignored() {
        let p = parser();
        let params = p
            .parse(
                "<bash></prompt><command>ls</command></bash>",
                &bash_spec(),
                ParseMode::Final,
            )
            .unwrap();
        assert_eq!(params["command"], "ls");
    }

    #[test]
    fn test_array_schema_must_have_one_element() {
        let mut bad =
            vec![ParamDefinition::required("items").array_of(ParamDefinition::required("a"))];
        bad[0].children.push(ParamDefinition::required("b"));
        let raw = json!({ "items": { "a": "1" } });
        assert!(map_and_validate_params(&raw, &bad, ParseMode::Final).is_err());
    }

    #[test]
    fn test_inner_text() {
        assert_eq!(
            inner_text("<completionResult> done </completionResult>", "completionResult"),
            "done"
        );
        assert_eq!(inner_text("<think>still going", "think"), "still going");
    }

    #[test]
    fn test_stop_paths() {
        let paths = stop_paths(&assign_spec());
        assert!(paths.contains("assignTasks.tasks.task.prompt"));
        assert!(paths.contains("assignTasks.tasks.task.tools.tool"));
        assert!(!paths.contains("assignTasks.tasks"));
    }
}
