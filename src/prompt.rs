use crate::types::{ExtractionField, ExtractionRequest};

const FIELDS_PLACEHOLDER: &str = "{fields}";
const CONTENT_PLACEHOLDER: &str = "{content}";

/// Render the field list the model is asked to fill.
///
/// One block per field: `- {label} ({name}) (required|optional)`, followed by
/// its type, description, and example when present.
pub fn describe_fields(fields: &[ExtractionField]) -> String {
    fields
        .iter()
        .map(|field| {
            let required = if field.required {
                "(required)"
            } else {
                "(optional)"
            };
            let mut block = format!(
                "- {} ({}) {}\n  Type: {}\n  Description: {}",
                field.label, field.name, required, field.field_type, field.description
            );
            if let Some(example) = field.example.as_deref().filter(|e| !e.is_empty()) {
                block.push_str(&format!("\n  Example: {}", example));
            }
            block
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Build the prompt sent to the extraction model.
///
/// A template's custom prompt wins: `{fields}` is replaced with the field
/// list, and `{content}` with the article text. Without a `{content}`
/// placeholder the article text is appended at the end.
pub fn build_extraction_prompt(request: &ExtractionRequest) -> String {
    let fields = describe_fields(&request.fields);

    match request
        .custom_prompt
        .as_deref()
        .filter(|p| !p.trim().is_empty())
    {
        Some(custom) => {
            let prompt = custom.replacen(FIELDS_PLACEHOLDER, &fields, 1);
            if prompt.contains(CONTENT_PLACEHOLDER) {
                prompt.replacen(CONTENT_PLACEHOLDER, &request.content, 1)
            } else {
                format!("{}\n\nArticle content:\n{}", prompt, request.content)
            }
        }
        None => default_prompt(&fields, &request.content),
    }
}

fn default_prompt(fields: &str, content: &str) -> String {
    format!(
        "Extract the following fields from the article below.\n\
\n\
Fields to extract:\n\
{fields}\n\
\n\
Article content:\n\
{content}\n\
\n\
Read the article carefully and extract a value for each field above. \
If a field cannot be found in the article, use null.\n\
\n\
Output requirements:\n\
1. Return a JSON array, even when there is only one record\n\
2. If the article contains several matching records, extract all of them into the array\n\
3. Each array element is an object containing every field\n\
4. Use each field's name (not its label) as the JSON key\n\
5. Number fields must be plain numbers without units or separators\n\
6. Date fields should use YYYY-MM or YYYY-MM-DD where possible\n\
7. Return only the JSON array, with no other text\n\
\n\
Example output:\n\
[\n  {{\n    \"field_name1\": \"value1\",\n    \"field_name2\": 123456,\n    \"field_name3\": \"2025-10\"\n  }}\n]",
        fields = fields,
        content = content,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FieldType, ModelPreference};

    fn field(name: &str, required: bool) -> ExtractionField {
        ExtractionField {
            name: name.to_string(),
            label: name.to_uppercase(),
            field_type: FieldType::Number,
            description: format!("the {}", name),
            required,
            example: None,
        }
    }

    fn request(custom: Option<&str>) -> ExtractionRequest {
        ExtractionRequest {
            content: "BODY".to_string(),
            fields: vec![field("amount", true)],
            model_preference: ModelPreference::Haiku,
            custom_prompt: custom.map(str::to_string),
        }
    }

    #[test]
    fn describe_marks_required_and_example() {
        let mut f = field("year", false);
        f.example = Some("2025".to_string());
        let text = describe_fields(&[field("amount", true), f]);
        assert!(text.contains("- AMOUNT (amount) (required)"));
        assert!(text.contains("- YEAR (year) (optional)"));
        assert!(text.contains("Type: number"));
        assert!(text.contains("Example: 2025"));
    }

    #[test]
    fn default_prompt_includes_fields_and_content() {
        let prompt = build_extraction_prompt(&request(None));
        assert!(prompt.contains("AMOUNT (amount)"));
        assert!(prompt.contains("BODY"));
        assert!(prompt.contains("JSON array"));
    }

    #[test]
    fn custom_prompt_substitutes_placeholders() {
        let prompt = build_extraction_prompt(&request(Some("F:{fields}|C:{content}")));
        assert!(prompt.starts_with("F:- AMOUNT"));
        assert!(prompt.ends_with("|C:BODY"));
    }

    #[test]
    fn custom_prompt_without_content_placeholder_appends() {
        let prompt = build_extraction_prompt(&request(Some("Just {fields}")));
        assert!(prompt.ends_with("Article content:\nBODY"));
    }
}
