//! Tensors - borrowed `DLTensor` views and owning NDArray objects
//!
//! Design: an NDArray owns a compact host buffer plus shape storage and
//! exposes them through an embedded `DLTensor`, so the same struct can be
//! lent out as a non-owning view.

use super::error::NativeError;
use super::object::{type_index, NativeObject, ObjectPtr};
use crate::interop::{DataType, Device};
use core::ffi::c_void;
use core::ptr;

/// Tensor descriptor shared across the boundary (never owning)
#[derive(Debug)]
#[repr(C)]
pub struct DLTensor {
    pub data: *mut c_void,
    pub device: Device,
    pub ndim: i32,
    pub dtype: DataType,
    pub shape: *mut i64,
    /// Null for compact row-major layout
    pub strides: *mut i64,
    pub byte_offset: u64,
}

impl DLTensor {
    /// # Safety
    /// `shape` must point to `ndim` readable values.
    pub unsafe fn shape(&self) -> &[i64] {
        if self.ndim <= 0 || self.shape.is_null() {
            &[]
        } else {
            core::slice::from_raw_parts(self.shape, self.ndim as usize)
        }
    }

    /// # Safety
    /// See `shape`.
    pub unsafe fn num_elements(&self) -> Result<usize, NativeError> {
        element_count(self.shape())
    }

    /// # Safety
    /// See `shape`.
    pub unsafe fn byte_size(&self) -> Result<usize, NativeError> {
        buffer_size(self.shape(), self.dtype)
    }

    #[inline]
    pub fn is_compact(&self) -> bool {
        self.strides.is_null()
    }

    /// Contents of a compact tensor
    ///
    /// # Safety
    /// `data` must hold `byte_offset + byte_size()` readable bytes.
    pub unsafe fn bytes(&self) -> Result<&[u8], NativeError> {
        if !self.is_compact() {
            return Err(NativeError::new("Strided tensors are not supported"));
        }
        let size = self.byte_size()?;
        if size == 0 {
            return Ok(&[]);
        }
        if self.data.is_null() {
            return Err(NativeError::new("Tensor has no data"));
        }
        let start = (self.data as *const u8).add(self.byte_offset as usize);
        Ok(core::slice::from_raw_parts(start, size))
    }

    /// Overwrite the contents of a compact tensor
    ///
    /// # Safety
    /// `data` must hold `byte_offset + byte_size()` writable bytes and no
    /// other reference to them may be live.
    pub unsafe fn write_bytes(&self, src: &[u8]) -> Result<(), NativeError> {
        if !self.is_compact() {
            return Err(NativeError::new("Strided tensors are not supported"));
        }
        let size = self.byte_size()?;
        if src.len() != size {
            return Err(NativeError::new(format!(
                "Size mismatch: tensor holds {} bytes, got {}",
                size,
                src.len()
            )));
        }
        if size > 0 {
            let dst = (self.data as *mut u8).add(self.byte_offset as usize);
            ptr::copy_nonoverlapping(src.as_ptr(), dst, size);
        }
        Ok(())
    }
}

/// Number of elements in `shape`, rejecting negative or overflowing dimensions
pub fn element_count(shape: &[i64]) -> Result<usize, NativeError> {
    shape.iter().try_fold(1usize, |count, &dim| {
        if dim < 0 {
            return Err(NativeError::new(format!("Negative dimension {} in shape {:?}", dim, shape)));
        }
        usize::try_from(dim)
            .ok()
            .and_then(|dim| count.checked_mul(dim))
            .ok_or_else(|| overflow(shape))
    })
}

/// Buffer bytes for a compact array of `shape` and `dtype`
pub fn buffer_size(shape: &[i64], dtype: DataType) -> Result<usize, NativeError> {
    element_count(shape)?
        .checked_mul(dtype.element_bytes())
        .filter(|&bytes| bytes <= isize::MAX as usize)
        .ok_or_else(|| overflow(shape))
}

fn overflow(shape: &[i64]) -> NativeError {
    NativeError::new(format!("Shape {:?} overflows the addressable size", shape))
}

/// Owning n-dimensional array
pub struct NDArrayObj {
    tensor: DLTensor,
    shape: Box<[i64]>,
    data: *mut u8,
    len: usize,
}

// Buffer and shape are owned exclusively by this object; concurrent
// writers through views are the caller's contract, as with any tensor.
unsafe impl Send for NDArrayObj {}
unsafe impl Sync for NDArrayObj {}

impl NativeObject for NDArrayObj {
    const TYPE_INDEX: u32 = type_index::NDARRAY;
    const TYPE_KEY: &'static str = "runtime.NDArray";
}

impl NDArrayObj {
    /// Zero-filled array
    pub fn empty(shape: &[i64], dtype: DataType, device: Device) -> Result<ObjectPtr<Self>, NativeError> {
        let bytes = vec![0u8; buffer_size(shape, dtype)?];
        Ok(Self::from_parts(shape, dtype, device, bytes))
    }

    /// Array initialised from a byte buffer of exactly the right size
    pub fn from_bytes(
        shape: &[i64],
        dtype: DataType,
        device: Device,
        bytes: &[u8],
    ) -> Result<ObjectPtr<Self>, NativeError> {
        let arr = Self::empty(shape, dtype, device)?;
        unsafe { arr.tensor.write_bytes(bytes)? };
        Ok(arr)
    }

    /// Owning copy of a borrowed tensor view
    ///
    /// # Safety
    /// `view` must describe readable memory.
    pub unsafe fn copy_from_tensor(view: &DLTensor) -> Result<ObjectPtr<Self>, NativeError> {
        let bytes = view.bytes()?.to_vec();
        Ok(Self::from_parts(view.shape(), view.dtype, view.device, bytes))
    }

    fn from_parts(shape: &[i64], dtype: DataType, device: Device, bytes: Vec<u8>) -> ObjectPtr<Self> {
        let mut shape: Box<[i64]> = shape.into();
        let len = bytes.len();
        let data = Box::into_raw(bytes.into_boxed_slice()) as *mut u8;
        let tensor = DLTensor {
            data: data as *mut c_void,
            device,
            ndim: shape.len() as i32,
            dtype,
            shape: shape.as_mut_ptr(),
            strides: ptr::null_mut(),
            byte_offset: 0,
        };
        ObjectPtr::new(Self { tensor, shape, data, len })
    }

    #[inline]
    pub fn tensor(&self) -> &DLTensor {
        &self.tensor
    }

    /// Pointer suitable for passing as a borrowed tensor view
    #[inline]
    pub fn tensor_ptr(&self) -> *mut DLTensor {
        &self.tensor as *const DLTensor as *mut DLTensor
    }

    pub fn shape(&self) -> &[i64] {
        &self.shape
    }

    pub fn dtype(&self) -> DataType {
        self.tensor.dtype
    }

    pub fn device(&self) -> Device {
        self.tensor.device
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        if self.len == 0 {
            return Vec::new();
        }
        unsafe { core::slice::from_raw_parts(self.data, self.len).to_vec() }
    }
}

impl Drop for NDArrayObj {
    fn drop(&mut self) {
        unsafe { drop(Box::from_raw(ptr::slice_from_raw_parts_mut(self.data, self.len))) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_array() {
        let arr = NDArrayObj::empty(&[2, 3], DataType::float32(), Device::cpu(0)).unwrap();
        assert_eq!(arr.shape(), &[2, 3]);
        assert_eq!(arr.to_bytes().len(), 24);
        unsafe {
            assert_eq!(arr.tensor().num_elements().unwrap(), 6);
            assert_eq!(arr.tensor().shape(), &[2, 3]);
        }
    }

    #[test]
    fn test_negative_dimension() {
        let err = NDArrayObj::empty(&[2, -1], DataType::int32(), Device::cpu(0)).unwrap_err();
        assert!(err.message().contains("Negative dimension -1"));
    }

    #[test]
    fn test_copy_from_view() {
        let bytes: Vec<u8> = (0..16).collect();
        let src = NDArrayObj::from_bytes(&[4], DataType::int32(), Device::cpu(0), &bytes).unwrap();
        let copy = unsafe { NDArrayObj::copy_from_tensor(src.tensor()).unwrap() };
        assert_eq!(copy.to_bytes(), bytes);
        assert!(!copy.same_as(&src));
    }

    #[test]
    fn test_overflowing_shape() {
        let err = NDArrayObj::empty(&[1 << 62, 4], DataType::new(1, 8, 1), Device::cpu(0)).unwrap_err();
        assert!(err.message().contains("overflows"));

        // Element count fits, byte size does not
        let err = NDArrayObj::empty(&[1 << 61], DataType::int64(), Device::cpu(0)).unwrap_err();
        assert!(err.message().contains("overflows"));
    }

    #[test]
    fn test_overflowing_view_is_not_copied() {
        let mut shape = [i64::MAX, i64::MAX];
        let mut byte = 0u8;
        let view = DLTensor {
            data: &mut byte as *mut u8 as *mut c_void,
            device: Device::cpu(0),
            ndim: 2,
            dtype: DataType::float32(),
            shape: shape.as_mut_ptr(),
            strides: ptr::null_mut(),
            byte_offset: 0,
        };
        let err = unsafe { NDArrayObj::copy_from_tensor(&view) }.unwrap_err();
        assert!(err.message().contains("overflows"));
    }

    #[test]
    fn test_size_mismatch() {
        let err = NDArrayObj::from_bytes(&[2], DataType::int64(), Device::cpu(0), &[0u8; 4]).unwrap_err();
        assert!(err.message().contains("Size mismatch"));
    }
}
