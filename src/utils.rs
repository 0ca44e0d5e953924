//! Utility functions for rendering characteristic values.

/// Render bytes as lowercase hex pairs without separators.
///
/// # Example
///
/// ```
/// use orientation_sensor_ble::utils::to_hex;
///
/// assert_eq!(to_hex(&[0x0a, 0xff]), "0aff");
/// ```
pub fn to_hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Render a number for display.
///
/// Whole numbers are printed without decimals, everything else with four.
///
/// # Example
///
/// ```
/// use orientation_sensor_ble::utils::format_number;
///
/// assert_eq!(format_number(25.0), "25");
/// assert_eq!(format_number(-12.34567), "-12.3457");
/// ```
pub fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{:.4}", value)
    }
}

/// Wrap a compass heading above 180° into the (-180, 180] range used for yaw.
///
/// # Example
///
/// ```
/// use orientation_sensor_ble::utils::heading_to_yaw;
///
/// assert!((heading_to_yaw(270.0) - (-90.0)).abs() < 0.001);
/// ```
#[inline]
pub fn heading_to_yaw(heading: f64) -> f64 {
    if heading > 180.0 {
        heading - 360.0
    } else {
        heading
    }
}
