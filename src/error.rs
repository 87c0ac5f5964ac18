use wasm_bindgen::JsValue;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("WebGL apparently not supported")]
    ContextUnavailable,

    #[error("{kind} shader compilation error: {log}")]
    ShaderCompile { kind: &'static str, log: String },

    #[error("shader program link error: {0}")]
    ProgramLink(String),

    #[error("invalid texture size: {width} x {height}")]
    InvalidDimensions { width: i32, height: i32 },

    #[error("texture size too large: {width} x {height} / max: {max}")]
    DimensionsTooLarge { width: i32, height: i32, max: i32 },

    #[error("GPU allocation failed: {0}")]
    GpuAllocation(String),

    #[error("gl error after {label}: {name} (0x{code:x})")]
    Gl {
        label: &'static str,
        name: &'static str,
        code: u32,
    },

    #[error("resource name already exists: {0}")]
    DuplicateName(String),

    #[error("used after destroy")]
    Destroyed,

    #[error("{0}")]
    Js(String),
}

impl From<RenderError> for JsValue {
    fn from(error: RenderError) -> JsValue {
        JsValue::from_str(&error.to_string())
    }
}

impl From<JsValue> for RenderError {
    fn from(value: JsValue) -> RenderError {
        RenderError::Js(js_value_to_string(&value))
    }
}

pub fn js_value_to_string(value: &JsValue) -> String {
    value.as_string().unwrap_or_else(|| format!("{:?}", value))
}
