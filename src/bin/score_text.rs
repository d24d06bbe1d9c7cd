use ppl_detector_lib::models::DetectResponse;
use ppl_detector_lib::services::config_store::{AppConfig, DetectionConfig};
use ppl_detector_lib::services::oracle::{RemoteOracle, ScoringOracle};
use ppl_detector_lib::services::text_processor::{count_alnum_chars, preview, split_lines};
use std::io::Read;
use std::time::Duration;

fn parse_arg_value(args: &[String], key: &str) -> Option<String> {
    args.iter()
        .position(|a| a == key)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn has_flag(args: &[String], key: &str) -> bool {
    args.iter().any(|a| a == key)
}

fn read_input(path: &str) -> Result<String, String> {
    if path == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .map_err(|e| format!("read stdin failed: {}", e))?;
        return Ok(buf);
    }
    std::fs::read_to_string(path).map_err(|e| format!("read file failed: {}", e))
}

fn main() -> Result<(), String> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!(
            "Usage:\n  cargo run --bin score_text -- <path|-> [--oracle <url>] [--stride <n>] [--context <n>] [--full-precision] [--lines <n>] [--out <json_path>]\n\nNotes:\n  - `-` reads the text from stdin.\n  - Without --oracle, PPLDETECTOR_ORACLE_URL or the config default is used.\n  - --full-precision keeps fractional perplexities instead of truncating them."
        );
        return Ok(());
    }

    let path = args[1].clone();
    let defaults = AppConfig::default();
    let oracle_url = parse_arg_value(&args, "--oracle")
        .or_else(|| std::env::var("PPLDETECTOR_ORACLE_URL").ok())
        .unwrap_or(defaults.oracle.base_url.clone());
    let stride: usize = parse_arg_value(&args, "--stride")
        .and_then(|s| s.parse().ok())
        .unwrap_or(defaults.detection.stride);
    let context_limit: Option<usize> =
        parse_arg_value(&args, "--context").and_then(|s| s.parse().ok());
    let lines_n: usize = parse_arg_value(&args, "--lines")
        .and_then(|s| s.parse().ok())
        .unwrap_or(50);
    let full_precision = has_flag(&args, "--full-precision");
    let out_path = parse_arg_value(&args, "--out");

    let text = read_input(&path)?;
    let segments = split_lines(&text);

    println!("Input: {}", path);
    println!(
        "Read: {} chars ({} bytes), {} alphanumeric",
        text.chars().count(),
        text.len(),
        count_alnum_chars(&text)
    );
    println!("Lines: {}", segments.len());
    println!("Oracle: {}", oracle_url);

    let oracle = RemoteOracle::connect(
        &oracle_url,
        Duration::from_secs(defaults.oracle.timeout_secs),
        context_limit,
    )
    .map_err(|e| format!("oracle connect failed: {}", e))?;

    let detection_config = DetectionConfig {
        stride,
        truncate_perplexity: !full_precision,
        ..DetectionConfig::default()
    };
    let detector = detection_config
        .build_detector(oracle.max_context_length())
        .map_err(|e| format!("detector setup failed: {}", e))?;

    println!(
        "Model: {} (context {}, stride {})",
        oracle.model_id(),
        detector.estimator().context_limit(),
        detector.estimator().stride()
    );

    let detection = detector
        .detect(&text, &oracle)
        .map_err(|e| format!("detection failed: {}", e))?;

    println!("\n--- Lines (first {}) ---", lines_n);
    for line in detection.lines.iter().take(lines_n) {
        println!("[{:>3}] ppl={:>8.2}  {}", line.index, line.perplexity, preview(&line.text, 80));
    }

    let report = &detection.report;
    println!("\n--- Report ---");
    println!("Perplexity:          {:.2}", report.perplexity);
    println!("Perplexity per line: {:.2}", report.perplexity_per_line);
    println!("Burstiness:          {:.2}", report.burstiness);
    println!("Label:               {}", report.label.as_u8());
    println!("Verdict:             {}", detection.verdict);

    if let Some(out) = out_path {
        let response = DetectResponse {
            output: detection.verdict.clone(),
            results: detection.report.clone(),
        };
        let json = serde_json::to_string_pretty(&response)
            .map_err(|e| format!("serialize failed: {}", e))?;
        std::fs::write(&out, json).map_err(|e| format!("write failed: {}", e))?;
        println!("\nWrote {}", out);
    }

    Ok(())
}
