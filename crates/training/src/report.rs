//! Minimal PDF 1.4 writer for per-epoch metric plots.
//!
//! One page per series, drawn with path operators and the built-in Helvetica font,
//! so the file needs no embedded resources.

use crate::checkpoint::ensure_parent;
use crate::error::{TrainError, TrainResult};
use data_contracts::EpochRecord;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

const PAGE_W: f64 = 612.0;
const PAGE_H: f64 = 792.0;
const PLOT_X0: f64 = 90.0;
const PLOT_X1: f64 = 540.0;
const PLOT_Y0: f64 = 220.0;
const PLOT_Y1: f64 = 620.0;

/// A named metric sampled once per epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub name: String,
    pub points: Vec<(f64, f64)>,
}

/// Total loss first, then each loss term, then lr and eval rates when present.
pub fn series_from_history(history: &[EpochRecord]) -> Vec<Series> {
    let mut names: Vec<String> = Vec::new();
    for record in history {
        for key in record.losses.keys() {
            if !names.contains(key) {
                names.push(key.clone());
            }
        }
    }
    names.sort_by_key(|n| (n != "loss", n.clone()));

    let mut out: Vec<Series> = names
        .into_iter()
        .map(|name| {
            let points = history
                .iter()
                .filter_map(|r| r.losses.get(&name).map(|v| (r.epoch as f64, *v)))
                .collect();
            Series { name, points }
        })
        .collect();

    out.push(Series {
        name: "lr".to_string(),
        points: history.iter().map(|r| (r.epoch as f64, r.lr)).collect(),
    });
    let optional = [
        ("precision", history.iter().map(|r| (r.epoch, r.precision)).collect::<Vec<_>>()),
        ("recall", history.iter().map(|r| (r.epoch, r.recall)).collect()),
    ];
    for (name, values) in optional {
        let points: Vec<_> = values
            .into_iter()
            .filter_map(|(e, v)| v.map(|v| (e as f64, v)))
            .collect();
        if !points.is_empty() {
            out.push(Series {
                name: name.to_string(),
                points,
            });
        }
    }
    out.retain(|s| s.points.iter().any(|(_, v)| v.is_finite()));
    out
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '(' | ')' | '\\' => {
                out.push('\\');
                out.push(ch);
            }
            c if c.is_ascii() && !c.is_ascii_control() => out.push(c),
            _ => out.push('?'),
        }
    }
    out
}

fn text(buf: &mut String, size: u32, x: f64, y: f64, s: &str) {
    let _ = writeln!(buf, "BT /F1 {size} Tf {x:.2} {y:.2} Td ({}) Tj ET", escape(s));
}

fn span(lo: f64, hi: f64) -> (f64, f64) {
    if (hi - lo).abs() > f64::EPSILON {
        (lo, hi)
    } else {
        let pad = if lo.abs() > 0.0 { lo.abs() * 0.1 } else { 1.0 };
        (lo - pad, hi + pad)
    }
}

fn fmt_value(v: f64) -> String {
    if v != 0.0 && (v.abs() < 1e-3 || v.abs() >= 1e4) {
        format!("{v:.3e}")
    } else {
        format!("{v:.4}")
    }
}

fn plot_page(series: &Series) -> String {
    let mut buf = String::new();
    text(&mut buf, 18, PLOT_X0, 700.0, &series.name);
    text(&mut buf, 10, PLOT_X0, 680.0, "per-epoch value");

    // Axes
    let _ = writeln!(buf, "0 0 0 RG 0.8 w");
    let _ = writeln!(
        buf,
        "{PLOT_X0} {PLOT_Y0} m {PLOT_X1} {PLOT_Y0} l S {PLOT_X0} {PLOT_Y0} m {PLOT_X0} {PLOT_Y1} l S"
    );

    let points: Vec<_> = series
        .points
        .iter()
        .copied()
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .collect();
    let (x_lo, x_hi) = span(
        points.iter().map(|p| p.0).fold(f64::INFINITY, f64::min),
        points.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max),
    );
    let (y_lo, y_hi) = span(
        points.iter().map(|p| p.1).fold(f64::INFINITY, f64::min),
        points.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max),
    );
    let to_page = |(x, y): (f64, f64)| {
        (
            PLOT_X0 + (x - x_lo) / (x_hi - x_lo) * (PLOT_X1 - PLOT_X0),
            PLOT_Y0 + (y - y_lo) / (y_hi - y_lo) * (PLOT_Y1 - PLOT_Y0),
        )
    };

    text(&mut buf, 9, PLOT_X0 - 70.0, PLOT_Y0 - 3.0, &fmt_value(y_lo));
    text(&mut buf, 9, PLOT_X0 - 70.0, PLOT_Y1 - 3.0, &fmt_value(y_hi));
    text(&mut buf, 9, PLOT_X0, PLOT_Y0 - 18.0, &format!("epoch {x_lo:.0}"));
    text(&mut buf, 9, PLOT_X1 - 40.0, PLOT_Y0 - 18.0, &format!("epoch {x_hi:.0}"));

    let _ = writeln!(buf, "0.1 0.3 0.8 RG 0.1 0.3 0.8 rg 1.5 w");
    let mapped: Vec<_> = points.into_iter().map(to_page).collect();
    if let Some(((x, y), rest)) = mapped.split_first() {
        let _ = write!(buf, "{x:.2} {y:.2} m");
        for (x, y) in rest {
            let _ = write!(buf, " {x:.2} {y:.2} l");
        }
        let _ = writeln!(buf, " S");
        for (x, y) in &mapped {
            let _ = writeln!(buf, "{:.2} {:.2} 4 4 re f", x - 2.0, y - 2.0);
        }
    }
    buf
}

fn empty_page() -> String {
    let mut buf = String::new();
    text(&mut buf, 18, PLOT_X0, 700.0, "Training report");
    text(&mut buf, 12, PLOT_X0, 670.0, "no epochs recorded");
    buf
}

/// Serialize `pages` (content streams) into a PDF byte buffer with a valid xref table.
fn assemble(pages: &[String]) -> Vec<u8> {
    let page_count = pages.len();
    // 1: catalog, 2: pages, 3: font, then (page, content) pairs.
    let total = 3 + 2 * page_count;
    let mut objects: Vec<String> = Vec::with_capacity(total);
    objects.push("<< /Type /Catalog /Pages 2 0 R >>".to_string());
    let kids = (0..page_count)
        .map(|i| format!("{} 0 R", 4 + 2 * i))
        .collect::<Vec<_>>()
        .join(" ");
    objects.push(format!("<< /Type /Pages /Kids [{kids}] /Count {page_count} >>"));
    objects.push("<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string());
    for (i, content) in pages.iter().enumerate() {
        let content_id = 5 + 2 * i;
        objects.push(format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {PAGE_W} {PAGE_H}] \
             /Resources << /Font << /F1 3 0 R >> >> /Contents {content_id} 0 R >>"
        ));
        objects.push(format!(
            "<< /Length {} >>\nstream\n{content}endstream",
            content.len()
        ));
    }

    let mut out: Vec<u8> = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n");
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n{body}\nendobj\n", i + 1).as_bytes());
    }
    let xref_at = out.len();
    let mut xref = format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1);
    for off in offsets {
        let _ = write!(xref, "{off:010} 00000 n \n");
    }
    let _ = write!(
        xref,
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref_at}\n%%EOF\n",
        objects.len() + 1
    );
    out.extend_from_slice(xref.as_bytes());
    out
}

pub fn render_pdf(history: &[EpochRecord]) -> Vec<u8> {
    let series = series_from_history(history);
    let pages: Vec<String> = if series.is_empty() {
        vec![empty_page()]
    } else {
        series.iter().map(plot_page).collect()
    };
    assemble(&pages)
}

/// Write the metric report for `history` to `path`, replacing any previous report.
pub fn write_pdf_report(path: &Path, history: &[EpochRecord]) -> TrainResult<()> {
    ensure_parent(path)?;
    let bytes = render_pdf(history);
    let staged = path.with_extension("pdf.tmp");
    fs::write(&staged, &bytes).map_err(|e| TrainError::io(&staged, e))?;
    fs::rename(&staged, path).map_err(|e| TrainError::io(path, e))?;
    tracing::info!(path = %path.display(), epochs = history.len(), "wrote metrics report");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn record(epoch: usize, loss: f64, precision: Option<f64>) -> EpochRecord {
        let mut losses = BTreeMap::new();
        losses.insert("loss".to_string(), loss);
        losses.insert("loss_box_reg".to_string(), loss / 2.0);
        EpochRecord {
            epoch,
            lr: 0.005,
            losses,
            precision,
            recall: None,
            duration_secs: 1.0,
        }
    }

    #[test]
    fn series_order_puts_total_loss_first() {
        let history = vec![record(0, 2.0, None), record(1, 1.0, Some(0.5))];
        let names: Vec<_> = series_from_history(&history)
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["loss", "loss_box_reg", "lr", "precision"]);
    }

    #[test]
    fn escape_handles_pdf_delimiters() {
        assert_eq!(escape("a(b)\\c"), "a\\(b\\)\\\\c");
        assert_eq!(escape("µ"), "?");
    }

    #[test]
    fn flat_series_gets_a_visible_range() {
        assert_eq!(span(0.0, 0.0), (-1.0, 1.0));
        let (lo, hi) = span(2.0, 2.0);
        assert!(lo < 2.0 && hi > 2.0);
    }
}
