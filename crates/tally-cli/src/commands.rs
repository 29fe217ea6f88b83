// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use anyhow::{anyhow, bail, Context, Result};
use serde_json::{Map, Value};
use tally::{LocalStore, Properties, TallyClient, TrackOutcome, UpdateOperation};

/// Splits `key=value`, parsing the value as JSON and falling back to a string.
fn parse_property(raw: &str) -> Result<(String, Value)> {
	let (key, value) = raw
		.split_once('=')
		.ok_or_else(|| anyhow!("property '{raw}' must be written as key=value"))?;

	let key = key.trim();
	if key.is_empty() {
		bail!("property '{raw}' has an empty key");
	}

	let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
	Ok((key.to_string(), value))
}

fn parse_properties(raw: &[String]) -> Result<Map<String, Value>> {
	raw.iter().map(|p| parse_property(p)).collect()
}

/// Value sent for a profile operation given the raw `--prop` arguments.
fn operation_value(operation: UpdateOperation, raw: &[String]) -> Result<Value> {
	match operation {
		UpdateOperation::Delete => Ok(Value::String(String::new())),
		UpdateOperation::Unset => {
			if raw.is_empty() {
				bail!("unset needs at least one property name");
			}
			let names = raw
				.iter()
				.map(|p| {
					let name = p.split_once('=').map_or(p.as_str(), |(k, _)| k);
					Value::String(name.trim().to_string())
				})
				.collect();
			Ok(Value::Array(names))
		}
		_ => {
			if raw.is_empty() {
				bail!("{operation} needs at least one key=value property");
			}
			Ok(Value::Object(parse_properties(raw)?))
		}
	}
}

fn report(outcome: TrackOutcome) -> Result<()> {
	match outcome {
		TrackOutcome::Sent => println!("sent"),
		TrackOutcome::Buffered => println!("buffered (will be sent on the next flush)"),
		TrackOutcome::Dropped => bail!("delivery failed and the local store could not keep it"),
	}
	Ok(())
}

pub async fn track(
	client: &TallyClient,
	name: &str,
	distinct_id: Option<String>,
	props: &[String],
	queue: bool,
) -> Result<()> {
	let mut event = client
		.event(name)
		.with_properties(Properties::from(parse_properties(props)?));
	if let Some(distinct_id) = distinct_id {
		event = event.with_distinct_id(distinct_id);
	}

	if queue {
		let added = client.save_element(event).await.context("failed to queue event")?;
		println!("{}", if added { "queued" } else { "already queued" });
		return Ok(());
	}

	let outcome = client.track(event).await.context("failed to track event")?;
	report(outcome)
}

pub async fn engage(
	client: &TallyClient,
	distinct_id: &str,
	operation: &str,
	props: &[String],
	ip: Option<String>,
	ignore_time: bool,
) -> Result<()> {
	let operation = UpdateOperation::parse(operation)
		.ok_or_else(|| anyhow!("unknown profile operation '{operation}'"))?;
	let value = operation_value(operation, props)?;

	let mut update = client
		.profile_update(distinct_id, operation, value)
		.with_ignore_time(ignore_time);
	if let Some(ip) = ip {
		update = update.with_ip(ip);
	}

	let outcome = client.track(update).await.context("failed to update profile")?;
	report(outcome)
}

pub async fn alias(client: &TallyClient, distinct_id: &str, alias: &str) -> Result<()> {
	let outcome = client
		.alias(distinct_id, alias)
		.await
		.context("failed to create alias")?;
	report(outcome)
}

pub async fn flush(client: &TallyClient) -> Result<()> {
	let summary = client.try_send_local_elements().await?;
	println!(
		"delivered {} in {} chunk(s), {} remaining",
		summary.delivered, summary.chunks, summary.remaining
	);

	if summary.failed_chunks > 0 {
		bail!(
			"{} of {} chunk(s) failed and were kept for the next flush",
			summary.failed_chunks,
			summary.chunks
		);
	}
	Ok(())
}

pub async fn status(store: &LocalStore, json: bool) -> Result<()> {
	let counts = store.pending_counts().await;
	if json {
		println!("{}", serde_json::to_string(&counts)?);
	} else {
		println!("pending events:          {}", counts.events);
		println!("pending profile updates: {}", counts.profile_updates);
	}
	Ok(())
}
