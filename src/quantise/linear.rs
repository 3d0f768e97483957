use crate::Weight;

/// Affine quantisation of each channel over its own `[min, max]`.
pub fn linear(shape: &[usize], values: &[f32], bits: u8) -> Weight {
    quantise_channels(shape, values, bits, |channel| {
        let lo = channel.iter().copied().fold(f32::INFINITY, f32::min);
        let hi = channel.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        (lo, hi)
    })
}

/// Affine quantisation of each channel over `[-m, m]`, `m` being its largest magnitude.
pub fn linear_symmetric(shape: &[usize], values: &[f32], bits: u8) -> Weight {
    quantise_channels(shape, values, bits, |channel| {
        let m = channel.iter().fold(0f32, |m, x| m.max(x.abs()));
        (-m, m)
    })
}

fn quantise_channels<F>(shape: &[usize], values: &[f32], bits: u8, range: F) -> Weight
where
    F: Fn(&[f32]) -> (f32, f32),
{
    let levels = f64::from((1u16 << bits) - 1);
    let channels = Weight::channels(shape);
    let per_channel = values.len() / channels.max(1);

    let mut scale = Vec::with_capacity(channels);
    let mut bias = Vec::with_capacity(channels);
    let mut codes = Vec::with_capacity(values.len());

    for channel in values.chunks(per_channel.max(1)) {
        let (lo, hi) = range(channel);

        // ranges wider than f32::MAX only fit in f64, the stored scale saturates
        let step = ((f64::from(hi) - f64::from(lo)) / levels).min(f64::from(f32::MAX));

        for &x in channel {
            let code = if step > 0.0 { ((f64::from(x) - f64::from(lo)) / step).round().clamp(0.0, levels) } else { 0.0 };
            codes.push(code as u8);
        }

        scale.push(step as f32);
        bias.push(lo);
    }

    // zero-sized channels still carry a scale and bias
    scale.resize(channels, 0.0);
    bias.resize(channels, 0.0);

    Weight::Linear { shape: shape.to_vec(), bits, scale, bias, codes }
}
