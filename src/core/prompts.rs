use crate::tools::ToolLanguage;

pub const NO_CONTEXT: &str = "Context: No external context available.";

pub struct ToolPrompt<'a> {
    pub tool_name: &'a str,
    pub task_description: &'a str,
    pub search_context: &'a str,
    pub language: ToolLanguage,
    pub allowed_imports: &'a [String],
}

impl ToolPrompt<'_> {
    pub fn render(&self) -> String {
        let imports = if self.allowed_imports.is_empty() {
            String::new()
        } else {
            format!(
                "\nPrefer these modules when you need imports: {}\n",
                self.allowed_imports.join(", ")
            )
        };

        format!(
            r#"You are an expert {language} developer. Write a complete, self-contained {language} program to accomplish the following task.
The program MUST read a single JSON object from stdin and print a single JSON object to stdout.
Print nothing else to stdout. Diagnostics go to stderr.

TASK: {task}

CONTEXT from web search:
{context}
{imports}
The program will be saved as {name}.{ext}.
{skeleton}
Respond with the program only, in one fenced code block."#,
            language = self.language.name(),
            task = self.task_description,
            context = self.search_context,
            imports = imports,
            name = self.tool_name,
            ext = self.language.extension(),
            skeleton = skeleton(self.language),
        )
    }
}

fn skeleton(language: ToolLanguage) -> &'static str {
    match language {
        ToolLanguage::Python => {
            r#"
Follow this structure:
```python
#!/usr/bin/env python3
import sys
import json

def execute(params: dict) -> dict:
    # Your implementation here
    return {}

if __name__ == "__main__":
    input_params = json.load(sys.stdin)
    result = execute(input_params)
    print(json.dumps(result))
```
"#
        }
        ToolLanguage::Shell => {
            r#"
Follow this structure:
```sh
#!/bin/sh
params=$(cat)
# Your implementation here
printf '%s\n' '{}'
```
"#
        }
    }
}
