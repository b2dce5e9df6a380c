// Export OpenAPI document as JSON
//
// Usage: cargo run --bin export-openapi > docs/api/openapi.json

use hookline_control_plane::openapi::ApiDoc;

fn main() {
    println!("{}", ApiDoc::to_json());
}
