use crate::domain::catalog::LicenseType;
use crate::domain::request::UsageParams;

// ============================================================================
// Local Pricing Formula
// ============================================================================
//
// sub-total = base price × quantity × support coefficient, rounded to cents.
// The quantity depends on how the service is licensed.

pub fn quantity(license_type: &LicenseType, usage: &UsageParams) -> f64 {
    match license_type {
        LicenseType::PerUser => usage.users as f64,
        LicenseType::PerCore => usage.cores as f64,
        LicenseType::Subscription => usage.period as f64,
        LicenseType::Other(_) => 1.0,
    }
}

pub fn line_subtotal(
    base_price: f64,
    license_type: &LicenseType,
    usage: &UsageParams,
    support_coefficient: f64,
) -> f64 {
    round_cents(base_price * quantity(license_type, usage) * support_coefficient)
}

pub fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(users: i32, cores: i32, period: i32) -> UsageParams {
        UsageParams {
            users,
            cores,
            period,
        }
    }

    #[test]
    fn test_per_user_pricing() {
        let usage = usage(120, 0, 1);
        assert_eq!(
            line_subtotal(16100.0, &LicenseType::PerUser, &usage, 1.0),
            1_932_000.0
        );
        assert_eq!(
            line_subtotal(16100.0, &LicenseType::PerUser, &usage, 1.3),
            2_511_600.0
        );
    }

    #[test]
    fn test_quantity_by_license_type() {
        let usage = usage(10, 4, 12);
        assert_eq!(quantity(&LicenseType::PerUser, &usage), 10.0);
        assert_eq!(quantity(&LicenseType::PerCore, &usage), 4.0);
        assert_eq!(quantity(&LicenseType::Subscription, &usage), 12.0);
        assert_eq!(
            quantity(&LicenseType::Other("site".to_string()), &usage),
            1.0
        );
    }

    #[test]
    fn test_rounding_to_cents() {
        assert_eq!(round_cents(10.005_1), 10.01);
        assert_eq!(round_cents(99.994), 99.99);
        assert_eq!(line_subtotal(33.33, &LicenseType::PerCore, &usage(0, 3, 1), 0.7), 69.99);
    }
}
