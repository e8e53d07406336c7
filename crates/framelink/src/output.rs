use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use framelink_formats::SourceSummary;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// Statistics of one frame, NaN excluded.
#[derive(Debug, Serialize)]
pub struct FrameStats {
    pub frame: usize,
    pub channel: usize,
    pub min: Option<f32>,
    pub max: Option<f32>,
    pub mean: Option<f32>,
}

#[derive(Serialize)]
struct InfoOutput<'a> {
    #[serde(flatten)]
    summary: &'a SourceSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    stats: Option<&'a FrameStats>,
    messages: &'a [String],
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

fn summary_rows(summary: &SourceSummary) -> Vec<(String, String)> {
    let mut rows = vec![
        ("path".to_string(), summary.path.clone()),
        (
            "size".to_string(),
            format!("{} x {} x {}", summary.nx, summary.ny, summary.length),
        ),
        ("channels".to_string(), summary.nc.to_string()),
        ("date".to_string(), summary.date.clone()),
        ("comment".to_string(), summary.comment.clone()),
        (
            "duration".to_string(),
            format!("{} ms", summary.duration_ms),
        ),
        ("fps".to_string(), format!("{:.3}", summary.fps)),
        ("bit range".to_string(), opt(summary.bit_range)),
        ("color map".to_string(), opt(summary.color_map)),
        ("flow".to_string(), summary.flow.to_string()),
        ("editable comment".to_string(), summary.set_comment.to_string()),
    ];
    if summary.vmin.is_some() || summary.vmax.is_some() {
        rows.push((
            "value range".to_string(),
            format!("{} .. {}", opt(summary.vmin), opt(summary.vmax)),
        ));
    }
    if let Some(opacity) = summary.opacity {
        rows.push(("opacity".to_string(), opacity.to_string()));
    }
    rows.extend(summary.metadata.iter().cloned());
    rows
}

fn stats_rows(stats: &FrameStats) -> Vec<(String, String)> {
    vec![
        (
            format!("frame {} / channel {}", stats.frame, stats.channel),
            format!(
                "min {} max {} mean {}",
                opt(stats.min),
                opt(stats.max),
                opt(stats.mean)
            ),
        ),
    ]
}

pub fn print_info(
    summary: &SourceSummary,
    stats: Option<&FrameStats>,
    messages: &[String],
    format: OutputFormat,
) {
    match format {
        OutputFormat::Json => {
            let out = InfoOutput {
                summary,
                stats,
                messages,
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"]);
            for (key, value) in summary_rows(summary)
                .into_iter()
                .chain(stats.map(stats_rows).unwrap_or_default())
            {
                table.add_row(vec![key, value]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for (key, value) in summary_rows(summary)
                .into_iter()
                .chain(stats.map(stats_rows).unwrap_or_default())
            {
                println!("{key:>18}: {value}");
            }
        }
        OutputFormat::Raw => {
            let line = match stats {
                Some(s) => format!(
                    "{} {} {} {} {} {} {}",
                    summary.nx,
                    summary.ny,
                    summary.length,
                    summary.nc,
                    opt(s.min),
                    opt(s.max),
                    opt(s.mean)
                ),
                None => format!(
                    "{} {} {} {}",
                    summary.nx, summary.ny, summary.length, summary.nc
                ),
            };
            println!("{line}");
        }
    }
}

/// One item received by `listen`.
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Received {
    Path {
        path: String,
    },
    Array {
        name: String,
        element_type: &'static str,
        /// `[min, max]` of the received values, NaNs ignored.
        range: Option<[f32; 2]>,
        #[serde(flatten)]
        summary: SourceSummary,
    },
    Command {
        command: String,
    },
    Points {
        name: String,
        parent_name: Option<String>,
        points: usize,
        frames: usize,
    },
}

impl Received {
    fn describe(&self) -> (&'static str, String) {
        match self {
            Self::Path { path } => ("path", path.clone()),
            Self::Array {
                name,
                element_type,
                summary,
                ..
            } => (
                "array",
                format!(
                    "{name} {element_type} {}x{}x{}{}",
                    summary.nx,
                    summary.ny,
                    summary.length,
                    if summary.flow { " flow" } else { "" }
                ),
            ),
            Self::Command { command } => ("command", command.clone()),
            Self::Points {
                name,
                points,
                frames,
                ..
            } => ("points", format!("{name} {points} points in {frames} frames")),
        }
    }
}

pub fn print_received(item: &Received, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(item).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let (kind, detail) = item.describe();
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["KIND", "DETAIL"])
                .add_row(vec![kind.to_string(), detail]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let (kind, detail) = item.describe();
            println!("{kind}: {detail}");
        }
        OutputFormat::Raw => {
            let (_, detail) = item.describe();
            println!("{detail}");
        }
    }
}

pub fn print_status(key: &str, value: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = serde_json::json!({ key: value });
            println!("{out}");
        }
        OutputFormat::Table | OutputFormat::Pretty => println!("{key}: {value}"),
        OutputFormat::Raw => println!("{value}"),
    }
}
