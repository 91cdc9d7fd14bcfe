use std::fs;

fn main() -> anyhow::Result<()> {
    // Generate the OpenAPI document without starting the server; handy for
    // committing a snapshot or diffing API changes in CI.
    let doc = worklane::docs::build_openapi(8000)?;
    let json = serde_json::to_string_pretty(&doc)?;
    let path = "/tmp/worklane-openapi.json";
    fs::write(path, &json)?;
    println!("wrote {}", path);
    Ok(())
}
