use anyhow::{bail, Context};
use reqwest::blocking::Client;
use serde_json::{json, Value};
use std::{collections::BTreeMap, time::Duration};

use super::{Backend, Category, Classification, LabelScore};
use crate::config::ClassifyConfig;

const SYSTEM_PROMPT: &str = "You classify outfit photos into exactly one fashion category: \
casual, smart, feminine, mode or outdoor. Answer with a JSON object of the form \
{\"category\": \"<category>\", \"scores\": {\"<category>\": <0..1>, ...}, \
\"labels\": [{\"label\": \"<garment>\", \"score\": <0..1>}, ...]}.";

pub fn classify(
    config: &ClassifyConfig,
    client: &Client,
    image_url: &str,
) -> anyhow::Result<Classification> {
    let api_key = config
        .openai_api_key
        .as_deref()
        .context("OPENAI_API_KEY is not set")?;

    let body = json!({
        "model": config.openai_model,
        "response_format": {"type": "json_object"},
        "max_tokens": 300,
        "messages": [
            {"role": "system", "content": SYSTEM_PROMPT},
            {"role": "user", "content": [
                {"type": "text", "text": "Classify this outfit."},
                {"type": "image_url", "image_url": {"url": image_url}},
            ]},
        ],
    });

    let resp = client
        .post(format!(
            "{}/v1/chat/completions",
            config.openai_base_url.trim_end_matches('/')
        ))
        .bearer_auth(api_key)
        .timeout(Duration::from_secs(config.openai_timeout_secs))
        .json(&body)
        .send()?;

    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().unwrap_or_default();
        bail!("chat completion returned {status}: {}", text.trim());
    }

    let completion: Value = resp.json()?;
    let content = completion
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .context("chat completion has no message content")?;

    let mut classification = parse_answer(content)?;
    classification.model = Some(config.openai_model.clone());

    Ok(classification)
}

/// Parse the model's JSON answer. Missing scores put the whole weight on the chosen category.
pub fn parse_answer(content: &str) -> anyhow::Result<Classification> {
    let content = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let answer: Value = serde_json::from_str(content)
        .with_context(|| format!("model answer is not JSON: {content}"))?;

    let category = answer
        .get("category")
        .and_then(Value::as_str)
        .and_then(Category::from_name)
        .with_context(|| format!("model answer has no known category: {content}"))?;

    let mut scores: BTreeMap<Category, f32> =
        Category::ALL.into_iter().map(|c| (c, 0.0)).collect();
    match answer.get("scores").and_then(Value::as_object) {
        Some(raw) if !raw.is_empty() => {
            for (name, score) in raw {
                if let (Some(c), Some(score)) = (Category::from_name(name), score.as_f64()) {
                    scores.insert(c, score as f32);
                }
            }
        }
        _ => {
            scores.insert(category, 1.0);
        }
    }

    let labels: Vec<LabelScore> = answer
        .get("labels")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .unwrap_or_default()
        .unwrap_or_default();

    Ok(Classification {
        category,
        mode: Backend::OpenAi,
        model: None,
        scores,
        labels,
        fallback_reason: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_answer() {
        let classification = parse_answer(
            r#"{"category":"smart","scores":{"smart":0.7,"casual":0.2},"labels":[{"label":"blazer","score":0.9}]}"#,
        )
        .unwrap();
        assert_eq!(classification.category, Category::Smart);
        assert!((classification.scores[&Category::Smart] - 0.7).abs() < 1e-6);
        assert_eq!(classification.scores[&Category::Outdoor], 0.0);
        assert_eq!(classification.labels[0].label, "blazer");
        assert_eq!(classification.mode, Backend::OpenAi);
    }

    #[test]
    fn test_parse_fenced_answer_without_scores() {
        let classification =
            parse_answer("```json\n{\"category\": \"アウトドア\"}\n```").unwrap();
        assert_eq!(classification.category, Category::Outdoor);
        assert_eq!(classification.scores[&Category::Outdoor], 1.0);
        assert!(classification.labels.is_empty());
    }

    #[test]
    fn test_parse_rejects_unknown_category() {
        assert!(parse_answer(r#"{"category":"street"}"#).is_err());
        assert!(parse_answer("I think it is casual").is_err());
    }

    #[test]
    fn test_missing_api_key() {
        let config = ClassifyConfig::default();
        let client = Client::new();
        let err = classify(&config, &client, "https://img.example.com/a.jpg").unwrap_err();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }
}
