//! Unit conversion for `CAP_PROP_EXPOSURE`, whose meaning depends on the capture backend.

/// How a capture backend interprets the exposure property.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExposureScale {
    /// Plain microseconds (Aravis, GStreamer and most vendor backends).
    Micros,
    /// V4L2 `exposure_absolute`, counted in 100 µs steps.
    HundredMicros,
    /// DirectShow and Media Foundation take `log2(seconds)`, rounded to an integer step.
    Log2Seconds,
}

impl ExposureScale {
    /// Scale for the name returned by `VideoCapture::get_backend_name`.
    pub fn for_backend(name: &str) -> Self {
        match name.trim().to_ascii_uppercase().as_str() {
            "V4L2" | "V4L" => ExposureScale::HundredMicros,
            "DSHOW" | "MSMF" => ExposureScale::Log2Seconds,
            _ => ExposureScale::Micros,
        }
    }

    /// Property value to hand to the backend for an exposure of `micros`.
    pub fn property_value(self, micros: u32) -> f64 {
        match self {
            ExposureScale::Micros => micros as f64,
            ExposureScale::HundredMicros => (micros as f64 / 100.0).round().max(1.0),
            ExposureScale::Log2Seconds => (micros.max(1) as f64 / 1_000_000.0).log2().round(),
        }
    }
}
