use std::cmp::min;

use providers::config::{default_stdio_config, ONNX_STDIO_DEFAULTS};
use providers::embedder::{Embedder, OnnxStdIoEmbedder};

fn main() {
    let text = std::env::args()
        .skip(1)
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_owned();

    let input = if text.is_empty() {
        "内部控制手册第三章第十二条".to_string()
    } else {
        text
    };

    let config = default_stdio_config();
    println!("model path: {}", ONNX_STDIO_DEFAULTS.model_path);
    println!("runtime library: {}", ONNX_STDIO_DEFAULTS.runtime_dll_path);

    let embedder = OnnxStdIoEmbedder::new(config).expect("failed to initialize embedder");
    let vector = embedder.embed(&input).expect("embedding failed");

    println!("input: {input}");
    println!("vector length: {}", vector.len());

    let preview = &vector[..min(8, vector.len())];
    println!("first {} values: {preview:?}", preview.len());
}
