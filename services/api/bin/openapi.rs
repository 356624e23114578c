//! Writes the service's OpenAPI document, by default to `openapi.json`.
//! An optional first argument overrides the output path.

use psychtrainer_api::router::ApiDoc;
use utoipa::OpenApi;

fn write_document(path: &str) -> anyhow::Result<()> {
    let json = ApiDoc::openapi().to_pretty_json()?;
    std::fs::write(path, json)?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let path = std::env::args().nth(1).unwrap_or_else(|| "openapi.json".to_string());
    write_document(&path)?;
    println!("OpenAPI document written to {path}");
    Ok(())
}
