// SPDX-FileCopyrightText: Copyright (c) 2025 Gantry Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Chat conversation templates.
//!
//! A template turns a structured chat into the single prompt string the
//! model was trained on, and contributes the stop strings and image
//! attachments that come with that format. Templates are resolved once at
//! startup, from a builtin name or a JSON template file, and are read-only
//! afterwards.

use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::protocols::openai::chat_completions::{ChatMessage, MessageContent};
use crate::protocols::ProtocolError;

/// How roles and messages are joined into a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeparatorStyle {
    AddColonSingle,
    AddColonTwo,
    NoColonSingle,
    ChatML,
}

impl FromStr for SeparatorStyle {
    type Err = ProtocolError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "ADD_COLON_SINGLE" => Ok(SeparatorStyle::AddColonSingle),
            "ADD_COLON_TWO" => Ok(SeparatorStyle::AddColonTwo),
            "NO_COLON_SINGLE" => Ok(SeparatorStyle::NoColonSingle),
            "CHATML" => Ok(SeparatorStyle::ChatML),
            other => Err(ProtocolError::UnknownSeparatorStyle(other.to_string())),
        }
    }
}

/// On-disk template file format.
#[derive(Deserialize)]
struct TemplateFile {
    name: String,
    system: String,
    #[serde(default)]
    system_message: String,
    user: String,
    assistant: String,
    sep_style: String,
    #[serde(default = "default_sep")]
    sep: String,
    #[serde(default)]
    sep2: Option<String>,
    stop_str: StopStr,
}

fn default_sep() -> String {
    "\n".to_string()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StopStr {
    One(String),
    Many(Vec<String>),
}

impl StopStr {
    fn into_vec(self) -> Vec<String> {
        match self {
            StopStr::One(stop) => vec![stop],
            StopStr::Many(stops) => stops,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatTemplate {
    pub name: String,
    /// Wrapper around the system message, with a `{system_message}` slot.
    pub system_template: String,
    pub system_message: String,
    /// (user role, assistant role) prefixes.
    pub roles: (String, String),
    pub sep_style: SeparatorStyle,
    pub sep: String,
    pub sep2: Option<String>,
    /// Stop strings this format requires. Seeded ahead of caller-supplied
    /// stops when the two are merged.
    pub stop_str: Vec<String>,
}

/// A rendered chat: the prompt plus the template's side outputs.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPrompt {
    pub prompt: String,
    pub stop: Vec<String>,
    pub image_data: Option<Vec<String>>,
}

impl ChatTemplate {
    /// Look up a builtin template by name.
    pub fn builtin(name: &str) -> Option<ChatTemplate> {
        match name {
            "chatml" => Some(ChatTemplate {
                name: "chatml".to_string(),
                system_template: "<|im_start|>system\n{system_message}".to_string(),
                system_message: String::new(),
                roles: (
                    "<|im_start|>user".to_string(),
                    "<|im_start|>assistant".to_string(),
                ),
                sep_style: SeparatorStyle::ChatML,
                sep: "<|im_end|>".to_string(),
                sep2: None,
                stop_str: vec!["<|im_end|>".to_string()],
            }),
            "vicuna_v1.1" => Some(ChatTemplate {
                name: "vicuna_v1.1".to_string(),
                system_template: "{system_message}".to_string(),
                system_message: "A chat between a curious user and an artificial \
                                 intelligence assistant. The assistant gives helpful, \
                                 detailed, and polite answers to the user's questions."
                    .to_string(),
                roles: ("USER".to_string(), "ASSISTANT".to_string()),
                sep_style: SeparatorStyle::AddColonTwo,
                sep: " ".to_string(),
                sep2: Some("</s>".to_string()),
                stop_str: vec!["</s>".to_string()],
            }),
            _ => None,
        }
    }

    /// Load a template from its JSON file form. An unrecognized
    /// `sep_style` name is a client-visible error, not a parse panic.
    pub fn from_file(path: &Path) -> anyhow::Result<ChatTemplate> {
        let raw = std::fs::read_to_string(path)?;
        let file: TemplateFile = serde_json::from_str(&raw)?;
        let sep_style = SeparatorStyle::from_str(&file.sep_style)?;
        Ok(ChatTemplate {
            name: file.name,
            system_template: format!("{}\n{{system_message}}", file.system),
            system_message: file.system_message,
            roles: (file.user, file.assistant),
            sep_style,
            sep: file.sep,
            sep2: file.sep2,
            stop_str: file.stop_str.into_vec(),
        })
    }

    /// Resolve a `--chat-template` argument: a builtin name, or a path to
    /// a template file.
    pub fn resolve(name_or_path: &str) -> anyhow::Result<ChatTemplate> {
        if let Some(template) = ChatTemplate::builtin(name_or_path) {
            return Ok(template);
        }
        let path = Path::new(name_or_path);
        if path.exists() {
            return ChatTemplate::from_file(path);
        }
        anyhow::bail!(
            "chat template `{name_or_path}` is neither a builtin template name nor a template file path"
        )
    }

    /// Render a chat into a prompt, collecting stop strings and image
    /// attachments, and appending the generation prompt for the assistant
    /// turn.
    pub fn render(&self, messages: &[ChatMessage]) -> Result<RenderedPrompt, ProtocolError> {
        let mut system_message = self.system_message.clone();
        let mut turns: Vec<(String, String)> = Vec::new();
        let mut image_data: Vec<String> = Vec::new();

        for message in messages {
            let text = flatten_content(&message.content, &mut image_data)?;
            match message.role.as_str() {
                "system" => system_message = text,
                "assistant" => turns.push((self.roles.1.clone(), text)),
                // user and any custom roles take the user slot
                _ => turns.push((self.roles.0.clone(), text)),
            }
        }
        // open the assistant turn the model is asked to complete
        turns.push((self.roles.1.clone(), String::new()));

        let system = self
            .system_template
            .replace("{system_message}", &system_message);
        let prompt = self.join_turns(&system, &turns);

        Ok(RenderedPrompt {
            prompt,
            stop: self.stop_str.clone(),
            image_data: if image_data.is_empty() {
                None
            } else {
                Some(image_data)
            },
        })
    }

    fn join_turns(&self, system: &str, turns: &[(String, String)]) -> String {
        let mut ret = String::new();
        match self.sep_style {
            SeparatorStyle::AddColonSingle => {
                ret.push_str(system);
                ret.push_str(&self.sep);
                for (role, message) in turns {
                    ret.push_str(role);
                    if message.is_empty() {
                        ret.push(':');
                    } else {
                        ret.push_str(": ");
                        ret.push_str(message);
                        ret.push_str(&self.sep);
                    }
                }
            }
            SeparatorStyle::AddColonTwo => {
                let seps = [
                    self.sep.as_str(),
                    self.sep2.as_deref().unwrap_or(self.sep.as_str()),
                ];
                ret.push_str(system);
                ret.push_str(seps[0]);
                for (i, (role, message)) in turns.iter().enumerate() {
                    ret.push_str(role);
                    if message.is_empty() {
                        ret.push(':');
                    } else {
                        ret.push_str(": ");
                        ret.push_str(message);
                        ret.push_str(seps[i % 2]);
                    }
                }
            }
            SeparatorStyle::NoColonSingle => {
                ret.push_str(system);
                for (role, message) in turns {
                    ret.push_str(role);
                    ret.push_str(message);
                    if !message.is_empty() {
                        ret.push_str(&self.sep);
                    }
                }
            }
            SeparatorStyle::ChatML => {
                if !system.is_empty() {
                    ret.push_str(system);
                    ret.push_str(&self.sep);
                    ret.push('\n');
                }
                for (role, message) in turns {
                    ret.push_str(role);
                    ret.push('\n');
                    if !message.is_empty() {
                        ret.push_str(message);
                        ret.push_str(&self.sep);
                        ret.push('\n');
                    }
                }
            }
        }
        ret
    }
}

/// Flatten message content to text, collecting image attachments.
/// Structured parts are only reachable through a configured template, so an
/// image part here is legitimate; the marker token stands in for the image.
fn flatten_content(
    content: &MessageContent,
    image_data: &mut Vec<String>,
) -> Result<String, ProtocolError> {
    match content {
        MessageContent::Text(text) => Ok(text.clone()),
        MessageContent::Parts(parts) => {
            let mut text = String::new();
            for part in parts {
                if let Some(fragment) = &part.text {
                    text.push_str(fragment);
                }
                if let Some(image) = &part.image_url {
                    image_data.push(image.url.clone());
                    text.push_str("<image>");
                }
            }
            Ok(text)
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::protocols::openai::chat_completions::{ContentPart, ImageUrl};

    use super::*;

    fn text_message(role: &str, content: &str) -> ChatMessage {
        ChatMessage {
            role: role.to_string(),
            content: MessageContent::Text(content.to_string()),
        }
    }

    #[test]
    fn chatml_render_appends_generation_prompt() {
        let template = ChatTemplate::builtin("chatml").unwrap();
        let rendered = template
            .render(&[
                text_message("system", "You are terse."),
                text_message("user", "hi"),
            ])
            .unwrap();

        assert_eq!(
            rendered.prompt,
            "<|im_start|>system\nYou are terse.<|im_end|>\n\
             <|im_start|>user\nhi<|im_end|>\n\
             <|im_start|>assistant\n"
        );
        assert_eq!(rendered.stop, vec!["<|im_end|>".to_string()]);
        assert!(rendered.image_data.is_none());
    }

    #[test]
    fn structured_parts_collect_images() {
        let template = ChatTemplate::builtin("chatml").unwrap();
        let message = ChatMessage {
            role: "user".to_string(),
            content: MessageContent::Parts(vec![
                ContentPart {
                    part_type: "text".to_string(),
                    text: Some("what is this?".to_string()),
                    image_url: None,
                },
                ContentPart {
                    part_type: "image_url".to_string(),
                    text: None,
                    image_url: Some(ImageUrl {
                        url: "https://example.com/cat.png".to_string(),
                    }),
                },
            ]),
        };

        let rendered = template.render(&[message]).unwrap();
        assert_eq!(
            rendered.image_data,
            Some(vec!["https://example.com/cat.png".to_string()])
        );
        assert!(rendered.prompt.contains("what is this?<image>"));
    }

    #[test]
    fn unknown_separator_style_is_a_client_error() {
        let err = SeparatorStyle::from_str("DOLLY_STYLE").unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownSeparatorStyle(name) if name == "DOLLY_STYLE"));
    }

    #[test]
    fn template_file_round_trips() {
        let dir = std::env::temp_dir().join("gantry-template-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("custom.json");
        std::fs::write(
            &path,
            r#"{
                "name": "custom",
                "system": "SYSTEM:",
                "user": "USER",
                "assistant": "BOT",
                "sep_style": "ADD_COLON_SINGLE",
                "sep": "\n",
                "stop_str": ["\nUSER"]
            }"#,
        )
        .unwrap();

        let template = ChatTemplate::from_file(&path).unwrap();
        assert_eq!(template.name, "custom");
        assert_eq!(template.sep_style, SeparatorStyle::AddColonSingle);
        assert_eq!(template.stop_str, vec!["\nUSER".to_string()]);

        let rendered = template.render(&[text_message("user", "hello")]).unwrap();
        assert!(rendered.prompt.ends_with("BOT:"));
    }
}
