/// Utility functions shared by the model, trainer and data code
use candle_core::{Device, Result, Tensor};
use ndarray::{Array2, Array3};
use num_traits::Float;

/// Glorot/Xavier uniform bound: `sqrt(6 / (fan_in + fan_out))`
pub fn glorot_bound(fan_in: usize, fan_out: usize) -> f64 {
    (6.0 / (fan_in + fan_out).max(1) as f64).sqrt()
}

/// (fan_in, fan_out) of a parameter shape. Weights are stored [out, in].
pub fn fans(dims: &[usize]) -> (usize, usize) {
    match dims {
        [] => (1, 1),
        [n] => (*n, *n),
        [out, inp] => (*inp, *out),
        [out, inp, rest @ ..] => {
            let receptive: usize = rest.iter().product();
            (inp * receptive, out * receptive)
        }
    }
}

/// Calculate the number of parameters in a tensor
pub fn count_parameters(tensor: &Tensor) -> usize {
    tensor.dims().iter().product()
}

/// True when every value is finite
pub fn all_finite<F: Float>(values: &[F]) -> bool {
    values.iter().all(|v| v.is_finite())
}

/// Copy a [batch, timestep, feature] array into an f32 tensor
pub fn array_to_tensor(array: &Array3<f32>, device: &Device) -> Result<Tensor> {
    let data: Vec<f32> = array.iter().copied().collect();
    Tensor::from_vec(data, array.dim(), device)
}

/// Copy a rank-3 tensor back into an array
pub fn tensor_to_array3(tensor: &Tensor) -> crate::Result<Array3<f32>> {
    let dims = tensor.dims3()?;
    let data = tensor
        .to_dtype(candle_core::DType::F32)?
        .flatten_all()?
        .to_vec1::<f32>()?;
    Ok(Array3::from_shape_vec(dims, data)?)
}

/// Copy a rank-2 tensor back into an array
pub fn tensor_to_array2(tensor: &Tensor) -> crate::Result<Array2<f32>> {
    let dims = tensor.dims2()?;
    let data = tensor
        .to_dtype(candle_core::DType::F32)?
        .flatten_all()?
        .to_vec1::<f32>()?;
    Ok(Array2::from_shape_vec(dims, data)?)
}
