use ndarray::{Array1, Array2, ArrayView1, Axis};

/// Row-wise numerically stable softmax.
pub(crate) fn softmax_rows(logits: &Array2<f32>) -> Array2<f32> {
    let mut out = logits.clone();
    for mut row in out.axis_iter_mut(Axis(0)) {
        let max = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        if sum > 0.0 {
            row.mapv_inplace(|v| v / sum);
        }
    }
    out
}

/// Index of the largest value. Ties resolve to the lowest index; NaN never wins.
pub(crate) fn argmax(values: ArrayView1<f32>) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in values.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

/// Averages the spatial axes of an `[H, W, C]` feature map.
pub(crate) fn global_average_pool(map: ndarray::ArrayView3<f32>) -> Array1<f32> {
    let (h, w, c) = map.dim();
    if h == 0 || w == 0 {
        return Array1::zeros(c);
    }
    map.sum_axis(Axis(0)).sum_axis(Axis(0)) / (h * w) as f32
}
