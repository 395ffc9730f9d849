use aictx_core::errors::{AppError, ErrorKind};
use serde_json::Value;

/// 1 for errors the user can act on, 2 for everything else.
pub fn exit_code(err: &AppError) -> i32 {
  match err.kind() {
    ErrorKind::Validation | ErrorKind::NotFound | ErrorKind::Cli | ErrorKind::State | ErrorKind::DataConsistency => 1,
    _ => 2,
  }
}

fn trace_line(err: &AppError) -> Option<String> {
  let ctx = err.context();
  let trace = ctx.get("traceId").and_then(Value::as_str)?;
  let request = ctx.get("requestId").and_then(Value::as_str).unwrap_or("-");
  Some(format!("trace: {trace} request: {request}"))
}

/// Message for stderr. Unexpected failures get a generic line plus correlation ids.
pub fn render_failure(action: &str, err: &AppError) -> String {
  let code = exit_code(err);
  let mut out = if code == 1 {
    format!("{action} failed: {}", err.message())
  } else {
    format!("{action} failed unexpectedly ({}): {}", err.code(), err.message())
  };
  let wrapped = err.context().contains_key("originalError");
  if (code == 2 || wrapped)
    && let Some(line) = trace_line(err)
  {
    out.push('\n');
    out.push_str(&line);
  }
  out
}
