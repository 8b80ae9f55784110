use axum::{
    extract::State,
    response::{Html, IntoResponse},
};
use minijinja::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::web::state::AppState;
use crate::web::templates::render_template;

// Main UI entry point
pub async fn index_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut context: HashMap<&str, Value> = HashMap::new();
    context.insert(
        "tables",
        Value::from_serialize(&state.config.warehouse.include_tables),
    );
    context.insert("model", Value::from(state.config.llm.model.clone()));

    Html(render_template(
        &state.template_env,
        "index.html",
        context,
    ))
}
