//! Incremental classification of a model stream into prose and tag spans.
//!
//! The parser knows nothing about what a tag means. It is fed raw deltas and
//! answers, for every chunk, which part of the buffered text is certainly prose,
//! which part might still turn into a start label, and which part belongs to the
//! body of a recognized tag.
//!
//! End labels are found by literal substring search. A tag whose body contains
//! its own closing label (`</bash>` inside a `<bash>` command, say) is terminated
//! early at that occurrence.

/// One classification decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParserEvent {
    /// Prose. `text` is the delta since the previous plain event; `partial` is
    /// false only for the text immediately preceding a recognized tag.
    PlainText { text: String, partial: bool },
    /// A recognized tag whose end label has not arrived yet. `buffer` holds
    /// everything from the start label so far.
    ToolCallPartial { name: String, buffer: String },
    /// A complete `<name>...</name>` span, unmodified.
    ToolCallFull { name: String, span: String },
    /// Text still buffered when the stream ended. `in_tag` names the tag whose
    /// end label never arrived, if any.
    LeftOver { text: String, in_tag: Option<String> },
}

#[derive(Debug, Clone)]
enum State {
    Scanning,
    Matched { name: String, end_label: String },
}

/// Explicit two-state scanner driven by [`StreamingTagParser::feed`].
#[derive(Debug, Clone)]
pub struct StreamingTagParser {
    /// `(name, "<name>")` pairs.
    labels: Vec<(String, String)>,
    buffer: String,
    state: State,
}

impl StreamingTagParser {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let labels = names
            .into_iter()
            .map(|n| {
                let name = n.into();
                let label = format!("<{name}>");
                (name, label)
            })
            .collect();
        Self {
            labels,
            buffer: String::new(),
            state: State::Scanning,
        }
    }

    /// True while inside a recognized tag.
    pub fn in_tag(&self) -> bool {
        matches!(self.state, State::Matched { .. })
    }

    /// Consume one delta and return the decisions it allows.
    pub fn feed(&mut self, chunk: &str) -> Vec<ParserEvent> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();

        loop {
            match &self.state {
                State::Scanning => {
                    if let Some((pos, name)) = self.earliest_label() {
                        events.push(ParserEvent::PlainText {
                            text: self.buffer[..pos].to_string(),
                            partial: false,
                        });
                        self.buffer.drain(..pos);
                        let end_label = format!("</{name}>");
                        self.state = State::Matched { name, end_label };
                        continue;
                    }
                    let keep_from = self.ambiguous_suffix_start();
                    let flushed: String = self.buffer.drain(..keep_from).collect();
                    if !flushed.is_empty() {
                        events.push(ParserEvent::PlainText {
                            text: flushed,
                            partial: true,
                        });
                    }
                    break;
                }
                State::Matched { name, end_label } => {
                    // the body starts after the start label
                    let body_start = name.len() + 2;
                    match self.buffer[body_start..].find(end_label.as_str()) {
                        Some(rel) => {
                            let stop = body_start + rel + end_label.len();
                            let span: String = self.buffer.drain(..stop).collect();
                            events.push(ParserEvent::ToolCallFull {
                                name: name.clone(),
                                span,
                            });
                            self.state = State::Scanning;
                        }
                        None => {
                            events.push(ParserEvent::ToolCallPartial {
                                name: name.clone(),
                                buffer: self.buffer.clone(),
                            });
                            break;
                        }
                    }
                }
            }
        }

        events
    }

    /// Flush whatever is still buffered once the stream has ended.
    pub fn finish(&mut self) -> Vec<ParserEvent> {
        let in_tag = match std::mem::replace(&mut self.state, State::Scanning) {
            State::Matched { name, .. } => Some(name),
            State::Scanning => None,
        };
        if self.buffer.is_empty() {
            return vec![];
        }
        vec![ParserEvent::LeftOver {
            text: std::mem::take(&mut self.buffer),
            in_tag,
        }]
    }

    fn earliest_label(&self) -> Option<(usize, String)> {
        self.labels
            .iter()
            .filter_map(|(name, label)| self.buffer.find(label.as_str()).map(|pos| (pos, name)))
            .min_by_key(|(pos, _)| *pos)
            .map(|(pos, name)| (pos, name.clone()))
    }

    /// Byte offset of the first `<` whose remainder could still grow into a
    /// start label, or the buffer length when nothing is ambiguous.
    fn ambiguous_suffix_start(&self) -> usize {
        self.buffer
            .match_indices('<')
            .map(|(i, _)| i)
            .find(|&i| {
                let tail = &self.buffer[i..];
                self.labels.iter().any(|(_, label)| label.starts_with(tail))
            })
            .unwrap_or(self.buffer.len())
    }
}
