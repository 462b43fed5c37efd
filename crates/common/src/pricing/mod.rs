//! Static per-operation pricing
//!
//! Rates mirror the providers' published prices. Providers without a
//! published per-image price report zero rather than a guess.

use crate::providers::Provider;

/// Cost per Grounded SAM mask generation, in USD
pub const MASK_GENERATION_COST: f64 = 0.0014;

/// Cost of one generation on the given provider, in USD
pub fn unit_cost(provider: Provider) -> f64 {
    match provider {
        Provider::GoogleImagen4 => 0.06,
        Provider::GeminiNanoBanana => 0.039,
        Provider::QwenImageEditPlus
        | Provider::SeedEdit3
        | Provider::Seedream4
        | Provider::NovaCanvas
        | Provider::GoogleVeo31
        | Provider::LocalUpload => 0.0,
    }
}

/// Format a USD amount for display
pub fn format_cost(amount: f64) -> String {
    format!("${:.2}", amount)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_costs() {
        assert_eq!(unit_cost(Provider::GoogleImagen4), 0.06);
        assert_eq!(unit_cost(Provider::GeminiNanoBanana), 0.039);
        assert_eq!(unit_cost(Provider::SeedEdit3), 0.0);
        assert_eq!(unit_cost(Provider::LocalUpload), 0.0);
    }

    #[test]
    fn test_format_cost() {
        assert_eq!(format_cost(0.06), "$0.06");
        assert_eq!(format_cost(1.239), "$1.24");
        assert_eq!(format_cost(0.0), "$0.00");
    }
}
