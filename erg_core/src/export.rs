//! Text and CSV rendering of converted workouts.

use crate::units::format_pace;
use crate::{ConversionResult, ConvertedInterval, Error, IntervalBasis, Result};
use std::str::FromStr;

const CSV_HEADER: [&str; 6] = [
    "Rep",
    "Target Watts",
    "Target RPM",
    "Target Pace",
    "Duration (s)",
    "Distance (m)",
];

/// Output format for a converted workout
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    Text,
    Csv,
}

impl FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Ok(ExportFormat::Text),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(Error::Config(format!("Unknown export format: {}", other))),
        }
    }
}

/// Render a conversion for sharing or printing
pub fn format_conversion(result: &ConversionResult, format: ExportFormat) -> Result<String> {
    match format {
        ExportFormat::Text => Ok(format_text(result)),
        ExportFormat::Csv => format_csv(result),
    }
}

fn format_text(result: &ConversionResult) -> String {
    let mut out = format!("{} Workout (Damper {}):\n\n", result.modality, result.damper);

    let lines: Vec<String> = result
        .intervals
        .iter()
        .map(|interval| {
            format!(
                "{}. {} @ {} RPM ({}W)",
                interval.rep,
                interval_extent(interval),
                interval.target_rpm,
                interval.target_watts
            )
        })
        .collect();
    out.push_str(&lines.join("\n"));

    out.push_str(&format!(
        "\n\nRest: {}s @ {}-{} RPM ({}W)",
        format_number(result.rest_seconds),
        result.rest.rpm_min,
        result.rest.rpm_max,
        result.rest.watts
    ));
    out
}

/// `250m` for distance-driven intervals, `55s` otherwise
fn interval_extent(interval: &ConvertedInterval) -> String {
    match (interval.basis, interval.distance_meters, interval.duration_seconds) {
        (IntervalBasis::Distance, Some(distance), _) => format!("{}m", format_number(distance)),
        (_, _, Some(duration)) => format!("{}s", format_number(duration)),
        (_, Some(distance), None) => format!("{}m", format_number(distance)),
        (_, None, None) => "-".to_string(),
    }
}

fn format_csv(result: &ConversionResult) -> Result<String> {
    let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
    writer.write_record(CSV_HEADER)?;

    let mut intervals: Vec<&ConvertedInterval> = result.intervals.iter().collect();
    intervals.sort_by_key(|i| i.rep);

    for interval in intervals {
        writer.write_record([
            interval.rep.to_string(),
            interval.target_watts.to_string(),
            interval.target_rpm.to_string(),
            format_pace(interval.target_pace),
            interval.duration_seconds.map(format_number).unwrap_or_default(),
            interval.distance_meters.map(format_number).unwrap_or_default(),
        ])?;
    }

    writer.write_record([
        "Rest".to_string(),
        result.rest.watts.to_string(),
        format!("{}-{}", result.rest.rpm_min, result.rest.rpm_max),
        "Easy".to_string(),
        format_number(result.rest_seconds),
        String::new(),
    ])?;

    let bytes = writer
        .into_inner()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    String::from_utf8(bytes).map_err(|e| Error::Other(format!("CSV output not UTF-8: {}", e)))
}

/// Whole numbers without a trailing `.0`, everything else to one decimal
fn format_number(value: f64) -> String {
    if (value - value.round()).abs() < 1e-9 {
        format!("{}", value.round() as i64)
    } else {
        format!("{:.1}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Modality, RestTargets};

    fn sample_result() -> ConversionResult {
        ConversionResult {
            modality: Modality::Bike,
            intervals: vec![
                ConvertedInterval {
                    rep: 1,
                    target_watts: 263,
                    target_rpm: 88,
                    target_pace: 220.0,
                    basis: IntervalBasis::Duration,
                    duration_seconds: Some(55.0),
                    distance_meters: None,
                },
                ConvertedInterval {
                    rep: 2,
                    target_watts: 230,
                    target_rpm: 84,
                    target_pace: 230.5,
                    basis: IntervalBasis::Duration,
                    duration_seconds: Some(115.0),
                    distance_meters: None,
                },
            ],
            rest_seconds: 45.0,
            damper: 5,
            rest: RestTargets {
                rpm_min: 60,
                rpm_max: 65,
                watts: 79,
            },
        }
    }

    #[test]
    fn test_text_export() {
        let text = format_conversion(&sample_result(), ExportFormat::Text).unwrap();
        assert_eq!(
            text,
            "Bike Workout (Damper 5):\n\n\
             1. 55s @ 88 RPM (263W)\n\
             2. 115s @ 84 RPM (230W)\n\n\
             Rest: 45s @ 60-65 RPM (79W)"
        );
    }

    #[test]
    fn test_text_export_distance_interval() {
        let mut result = sample_result();
        result.modality = Modality::Row;
        result.intervals.truncate(1);
        result.intervals[0].basis = IntervalBasis::Distance;
        result.intervals[0].distance_meters = Some(250.0);
        let text = format_conversion(&result, ExportFormat::Text).unwrap();
        assert!(text.starts_with("Row Workout (Damper 5):"));
        assert!(text.contains("1. 250m @ 88 RPM (263W)"));
    }

    #[test]
    fn test_csv_export() {
        let csv = format_conversion(&sample_result(), ExportFormat::Csv).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(
            lines[0],
            "Rep,Target Watts,Target RPM,Target Pace,Duration (s),Distance (m)"
        );
        assert_eq!(lines[1], "1,263,88,3:40.0,55,");
        assert_eq!(lines[2], "2,230,84,3:50.5,115,");
        assert_eq!(lines[3], "Rest,79,60-65,Easy,45,");
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn test_csv_rows_in_rep_order() {
        let mut result = sample_result();
        result.intervals.reverse();
        let csv = format_conversion(&result, ExportFormat::Csv).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert!(lines[1].starts_with("1,"));
        assert!(lines[2].starts_with("2,"));
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("CSV".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert_eq!("text".parse::<ExportFormat>().unwrap(), ExportFormat::Text);
        assert!("pdf".parse::<ExportFormat>().is_err());
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(45.0), "45");
        assert_eq!(format_number(55.26), "55.3");
        assert_eq!(format_number(112.4), "112.4");
    }
}
