//! Command execution.

use crate::Commands;
use colored::Colorize;
use rets_client::Session;
use rets_protocol::{
    GetMetadataParams, GetObjectParams, LoginResponse, MetadataFormat, SearchParams,
    SearchResult,
};
use serde_json::{json, Map, Value};
use std::fs::File;
use std::path::Path;

type CommandResult = Result<String, Box<dyn std::error::Error>>;

/// Executes a command and returns the formatted output.
pub fn execute(
    session: &mut Session,
    login: &LoginResponse,
    cmd: Commands,
    json: bool,
) -> CommandResult {
    match cmd {
        Commands::Login => Ok(format_login(session, login, json)),

        Commands::Search {
            search_type,
            class,
            query,
            select,
            limit,
            offset,
            standard_names,
        } => {
            let mut params = SearchParams::new(search_type, class, query)
                .with_select(select)
                .with_standard_names(standard_names);
            if let Some(limit) = limit {
                params = params.with_limit(limit);
            }
            if let Some(offset) = offset {
                params = params.with_offset(offset);
            }
            let result = session.search(&params)?;
            Ok(format_search(&result, json))
        }

        Commands::Count {
            search_type,
            class,
            query,
        } => {
            let count = session.count(&SearchParams::new(search_type, class, query))?;
            if json {
                Ok(json!({ "count": count }).to_string())
            } else {
                Ok(format!("{} records", count.to_string().cyan()))
            }
        }

        Commands::Metadata {
            metadata_type,
            id,
            compact,
            output,
        } => {
            let format = if compact {
                MetadataFormat::Compact
            } else {
                MetadataFormat::Standard
            };
            let params = GetMetadataParams::new(metadata_type, id).with_format(format);
            let metadata = session.get_metadata(&params)?;
            match output {
                Some(path) => {
                    metadata.write_to(File::create(&path)?)?;
                    Ok(format!(
                        "{} {} bytes to {}",
                        "Wrote".green(),
                        metadata.len(),
                        path.display()
                    ))
                }
                None => Ok(String::from_utf8_lossy(&metadata.document).into_owned()),
            }
        }

        Commands::GetObject {
            resource,
            object_type,
            ids,
            location,
            output,
        } => {
            let mut params = GetObjectParams::new(resource, object_type);
            for id in &ids {
                params = add_id(params, id);
            }
            if location {
                get_object_urls(session, &params, json)
            } else {
                get_objects(session, &params, &output, json)
            }
        }
    }
}

/// Adds `ENTITY` or `ENTITY:1:2` to the request.
fn add_id(params: GetObjectParams, id: &str) -> GetObjectParams {
    let mut parts = id.split(':');
    let entity = parts.next().unwrap_or_default();
    let objects: Vec<&str> = parts.filter(|p| !p.is_empty() && *p != "*").collect();
    if objects.is_empty() {
        return params.add_entity(entity);
    }
    objects
        .into_iter()
        .fold(params, |params, object| params.add_object(entity, object))
}

fn get_object_urls(session: &mut Session, params: &GetObjectParams, json: bool) -> CommandResult {
    let locations = session.get_object_urls(params)?;
    if json {
        let items: Vec<Value> = locations
            .iter()
            .map(|l| {
                json!({
                    "content_id": l.content_id,
                    "object_id": l.object_id,
                    "description": l.description,
                    "url": l.url,
                    "preferred": l.preferred,
                    "reply_code": l.reply.as_ref().map(|r| r.code.code()),
                })
            })
            .collect();
        return Ok(serde_json::to_string_pretty(&items)?);
    }

    let lines: Vec<String> = locations
        .iter()
        .map(|l| {
            let id = format!(
                "{}:{}",
                l.content_id.as_deref().unwrap_or("?"),
                l.object_id.as_deref().unwrap_or("?")
            );
            match (&l.url, &l.reply) {
                (Some(url), _) => format!("{} {}", id.cyan(), url),
                (None, Some(reply)) => format!("{} {}", id.cyan(), reply.code.to_string().yellow()),
                (None, None) => format!("{} {}", id.cyan(), "no location".yellow()),
            }
        })
        .collect();
    Ok(lines.join("\n"))
}

fn get_objects(
    session: &mut Session,
    params: &GetObjectParams,
    dir: &Path,
    json: bool,
) -> CommandResult {
    let mut response = session.get_object(params)?;
    if let Some(reply) = response.reply() {
        if !reply.is_success() {
            return Ok(format!("{}", reply.code.to_string().yellow()));
        }
    }

    let mut written = Vec::new();
    let mut objects = response.objects()?;
    let mut index = 0usize;
    while let Some(mut object) = objects.next_object()? {
        index += 1;
        let content_id = object.content_id().unwrap_or("object").to_string();
        let object_id = object
            .object_id()
            .map(String::from)
            .unwrap_or_else(|| index.to_string());
        let content_type = object.content_type().map(String::from);

        if !object.has_body() {
            let code = object.reply().map(|r| r.code.to_string());
            tracing::warn!(
                "No data for {}:{}: {}",
                content_id,
                object_id,
                code.as_deref().unwrap_or("no body")
            );
            continue;
        }
        let Some(body) = object.body() else {
            continue;
        };

        let name = format!(
            "{}-{}.{}",
            sanitize(&content_id),
            sanitize(&object_id),
            extension(content_type.as_deref())
        );
        let path = dir.join(name);
        let mut file = File::create(&path)?;
        let bytes = std::io::copy(body, &mut file)?;
        written.push((content_id, object_id, content_type, path, bytes));
    }

    if json {
        let items: Vec<Value> = written
            .iter()
            .map(|(content_id, object_id, content_type, path, bytes)| {
                json!({
                    "content_id": content_id,
                    "object_id": object_id,
                    "content_type": content_type,
                    "path": path.display().to_string(),
                    "bytes": bytes,
                })
            })
            .collect();
        return Ok(serde_json::to_string_pretty(&items)?);
    }

    let lines: Vec<String> = written
        .iter()
        .map(|(_, _, _, path, bytes)| {
            format!("{} {} ({} bytes)", "Wrote".green(), path.display(), bytes)
        })
        .collect();
    Ok(lines.join("\n"))
}

fn format_login(session: &Session, login: &LoginResponse, json: bool) -> String {
    let capabilities: Map<String, Value> = session
        .capabilities()
        .iter()
        .map(|(kind, url)| (kind.key().to_string(), Value::String(url.to_string())))
        .collect();

    if json {
        return json!({
            "version": session.version().as_str(),
            "session_id": login.session_id(),
            "member_name": login.member_name(),
            "user": login.user_information(),
            "broker": login.broker(),
            "metadata_version": login.metadata_version(),
            "metadata_timestamp": login.metadata_timestamp(),
            "timeout_seconds": login.session_timeout(),
            "capabilities": capabilities,
        })
        .to_string();
    }

    let mut lines = vec![format!(
        "{} to {} ({})",
        "Logged in".green(),
        session.login_url(),
        session.version()
    )];
    let fields = [
        ("Member", login.member_name()),
        ("User", login.user_information()),
        ("Broker", login.broker()),
        ("Metadata version", login.metadata_version()),
        ("Metadata timestamp", login.metadata_timestamp()),
    ];
    for (label, value) in fields {
        if let Some(value) = value {
            lines.push(format!("  {}: {}", label.bold(), value));
        }
    }
    for (kind, url) in session.capabilities().iter() {
        lines.push(format!("  {} {}", kind.key().cyan(), url));
    }
    lines.join("\n")
}

fn format_search(result: &SearchResult, json: bool) -> String {
    if json {
        let records: Vec<Value> = result
            .records()
            .map(|record| {
                Value::Object(
                    record
                        .into_iter()
                        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
                        .collect(),
                )
            })
            .collect();
        return json!({
            "count": result.count(),
            "max_rows": result.is_max_rows(),
            "records": records,
        })
        .to_string();
    }

    let mut lines = Vec::with_capacity(result.row_count() + 2);
    if !result.columns().is_empty() {
        lines.push(result.columns().join("\t").bold().to_string());
    }
    for row in result.rows() {
        lines.push(row.join("\t"));
    }
    let mut footer = format!("{} of {} records", result.row_count(), result.count());
    if result.is_max_rows() {
        footer.push_str(" (truncated by server)");
    }
    lines.push(footer.dimmed().to_string());
    lines.join("\n")
}

fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

fn extension(content_type: Option<&str>) -> &'static str {
    let mime = content_type
        .and_then(|c| c.split(';').next())
        .map(|c| c.trim().to_ascii_lowercase())
        .unwrap_or_default();
    match mime.as_str() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/tiff" => "tif",
        "application/pdf" => "pdf",
        "text/plain" => "txt",
        "text/xml" => "xml",
        _ => "bin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_id() {
        let params = GetObjectParams::new("Property", "Photo");
        let params = add_id(params, "L1");
        let params = add_id(params, "L2:1:3");
        let params = add_id(params, "L3:*");
        assert_eq!(params.id_param(), "L1:*,L2:1:3,L3:*");
    }

    #[test]
    fn test_extension() {
        assert_eq!(extension(Some("image/jpeg")), "jpg");
        assert_eq!(extension(Some("Image/PNG; charset=binary")), "png");
        assert_eq!(extension(Some("application/octet-stream")), "bin");
        assert_eq!(extension(None), "bin");
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("L1/../x"), "L1____x");
        assert_eq!(sanitize("abc-1_2"), "abc-1_2");
    }
}
