use num_format::{Locale, ToFormattedString};

/// Display codes offered by the currency selector, USD first
pub const SUPPORTED_CURRENCIES: [&str; 7] = ["USD", "INR", "EUR", "GBP", "JPY", "AUD", "CAD"];

fn currency_symbol(code: &str) -> &str {
    match code {
        "USD" => "$",
        "INR" => "₹",
        "EUR" => "€",
        "GBP" => "£",
        "JPY" => "¥",
        "AUD" => "A$",
        "CAD" => "CA$",
        other => other,
    }
}

/// `value * rate` with grouping and two decimals, e.g. `$96,123.45`
pub fn format_currency(value: f64, rate: f64, code: &str) -> String {
    let converted = value * rate;
    if !converted.is_finite() {
        return format!("{}--", currency_symbol(code));
    }

    let fixed = format!("{:.2}", converted.abs());
    let (whole, cents) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));
    let grouped = whole
        .parse::<u64>()
        .map(|n| n.to_formatted_string(&Locale::en))
        .unwrap_or_else(|_| whole.to_string());
    let sign = if converted < 0.0 && fixed != "0.00" { "-" } else { "" };

    format!("{}{}{}.{}", sign, currency_symbol(code), grouped, cents)
}

/// Same as [`format_currency`] for a decimal string from the store
pub fn format_currency_str(value: &str, rate: f64, code: &str) -> String {
    format_currency(value.parse::<f64>().unwrap_or(f64::NAN), rate, code)
}

/// Signed percentage, e.g. `+1.23%` / `-0.50%`
pub fn format_pct(value: f64) -> String {
    let sign = if value > 0.0 { "+" } else { "" };
    format!("{}{:.2}%", sign, value)
}
