//! Human-readable text output

use super::QueryResult;
use std::time::Duration;

/// Print one query result to the console
pub fn print_result(query: &str, result: &QueryResult, elapsed: Duration) {
    println!("{} ({:.3}s)", query, elapsed.as_secs_f64());
    match result {
        QueryResult::Generated { workers } => {
            println!("  Generated on {} worker{}", workers, if *workers == 1 { "" } else { "s" });
        }
        QueryResult::Average { value } => println!("  Average: {}", value),
        QueryResult::Median { value } => println!("  Median: {}", value),
        QueryResult::Sorted(report) => {
            println!("  Sorted {} values", format_number(report.total));
            for (i, segment) in report.segments.iter().enumerate() {
                println!("    [{}] {}: {} values", i, segment.worker, format_number(segment.values));
            }
        }
        QueryResult::TopK { entries } => {
            if entries.is_empty() {
                println!("  (no values)");
            }
            for (rank, e) in entries.iter().enumerate() {
                println!("  {:>3}. {:>12}  x{}", rank + 1, e.value, format_number(e.count));
            }
        }
        QueryResult::Acknowledged => println!("  OK"),
    }
}

/// Print a failed query
pub fn print_failure(query: &str, reason: &str) {
    println!("{} failed: {}", query, reason);
}

/// Format number with thousands separators
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();

    for (count, c) in s.chars().rev().enumerate() {
        if count > 0 && count % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }

    result.chars().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234567), "1,234,567");
    }
}
