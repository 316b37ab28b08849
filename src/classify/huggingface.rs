use anyhow::{anyhow, bail, Context};
use reqwest::{
    blocking::{Client, Response},
    header::CONTENT_TYPE,
    StatusCode,
};
use serde_json::Value;
use std::time::Duration;

use super::{labels, Backend, Classification, LabelScore};
use crate::{config::ClassifyConfig, scrape::HtmlFetcher};

enum Attempt {
    Done(Vec<LabelScore>),
    Retry(anyhow::Error),
    Fatal(anyhow::Error),
}

pub fn classify(
    config: &ClassifyConfig,
    client: &Client,
    fetcher: &HtmlFetcher,
    image_url: &str,
) -> anyhow::Result<Classification> {
    let image = fetcher
        .fetch_bytes(image_url, Duration::from_secs(config.image_timeout_secs))
        .context("failed to download image")?;

    let predictions = infer(config, client, image)?;
    let scores = labels::score_categories(&predictions);

    Ok(Classification {
        category: labels::top_category(&scores),
        mode: Backend::HuggingFace,
        model: Some(config.hf_model.clone()),
        scores,
        labels: predictions,
        fallback_reason: None,
    })
}

/// Delay before retry number `attempt` (zero-based): base * 2^attempt, capped.
pub fn backoff_delay(config: &ClassifyConfig, attempt: u32) -> Duration {
    let factor = 1u64 << attempt.min(16);
    let ms = config.backoff_base_ms.saturating_mul(factor);
    Duration::from_millis(ms.min(config.backoff_cap_ms))
}

/// Run image classification, retrying while the model is unavailable or loading.
pub fn infer(
    config: &ClassifyConfig,
    client: &Client,
    image: Vec<u8>,
) -> anyhow::Result<Vec<LabelScore>> {
    let url = format!(
        "{}/models/{}",
        config.hf_base_url.trim_end_matches('/'),
        config.hf_model
    );
    let mut attempt = 0;

    loop {
        let mut req = client
            .post(&url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header("x-wait-for-model", "true")
            .timeout(Duration::from_secs(config.hf_timeout_secs))
            .body(image.clone());

        if let Some(token) = &config.hf_token {
            req = req.bearer_auth(token);
        }

        let outcome = match req.send() {
            Ok(resp) => read_predictions(resp),
            Err(err) if err.is_timeout() || err.is_connect() => {
                Attempt::Retry(anyhow!("request failed: {err}"))
            }
            Err(err) => Attempt::Fatal(err.into()),
        };

        match outcome {
            Attempt::Done(predictions) => return Ok(predictions),
            Attempt::Fatal(err) => return Err(err),
            Attempt::Retry(err) => {
                if attempt >= config.max_retries {
                    return Err(err.context(format!("gave up after {} retries", attempt)));
                }
                let delay = backoff_delay(config, attempt);
                log::debug!("{}: {err}, retrying in {delay:?}", config.hf_model);
                std::thread::sleep(delay);
                attempt += 1;
            }
        }
    }
}

fn read_predictions(resp: Response) -> Attempt {
    let status = resp.status();

    if status == StatusCode::SERVICE_UNAVAILABLE || status == StatusCode::GATEWAY_TIMEOUT {
        return Attempt::Retry(anyhow!("model unavailable ({status})"));
    }

    let body = match resp.text() {
        Ok(body) => body,
        Err(err) => return Attempt::Fatal(err.into()),
    };

    if is_loading(&body) {
        return Attempt::Retry(anyhow!("model is currently loading"));
    }

    if !status.is_success() {
        return Attempt::Fatal(anyhow!("inference returned {status}: {}", body.trim()));
    }

    match parse_predictions(&body) {
        Ok(predictions) => Attempt::Done(predictions),
        Err(err) => Attempt::Fatal(err),
    }
}

fn is_loading(body: &str) -> bool {
    body.to_ascii_lowercase().contains("currently loading")
}

/// `[{label, score}, ...]`, also accepting the batched `[[...]]` shape. Sorted best first.
pub fn parse_predictions(body: &str) -> anyhow::Result<Vec<LabelScore>> {
    let value: Value = serde_json::from_str(body).context("inference response is not JSON")?;

    let value = match value {
        Value::Array(mut items) if items.first().is_some_and(Value::is_array) => items.remove(0),
        Value::Object(ref obj) if obj.contains_key("error") => {
            bail!("inference error: {}", obj["error"]);
        }
        value => value,
    };

    let mut predictions: Vec<LabelScore> =
        serde_json::from_value(value).context("unexpected inference response shape")?;
    predictions.sort_by(|a, b| b.score.total_cmp(&a.score));

    Ok(predictions)
}
