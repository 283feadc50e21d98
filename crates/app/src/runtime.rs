//! Torch CUDA runtime loader.

use std::sync::OnceLock;

use libloading::os::unix::{Library, RTLD_GLOBAL, RTLD_NOW};
use tracing::{debug, warn};

const TORCH_CUDA_LIBRARIES: [&str; 3] = [
    "libtorch_cuda.so",
    "libtorch_cuda_cu.so",
    "libtorch_cuda_cpp.so",
];

/// Load the torch CUDA libraries globally so `tch` can see the CUDA backend.
/// Returns how many were found; the handles live for the whole process.
pub(crate) fn load_torch_cuda_runtime() -> usize {
    static LOADED: OnceLock<Vec<Library>> = OnceLock::new();
    LOADED
        .get_or_init(|| {
            let handles: Vec<Library> = TORCH_CUDA_LIBRARIES
                .into_iter()
                .filter_map(|lib| {
                    // SAFETY: these libraries only run their static initialisers on load.
                    match unsafe { Library::open(Some(lib), RTLD_NOW | RTLD_GLOBAL) } {
                        Ok(handle) => {
                            debug!("Loaded {lib}");
                            Some(handle)
                        }
                        Err(err) => {
                            debug!("{lib} not loaded: {err}");
                            None
                        }
                    }
                })
                .collect();
            if handles.is_empty() {
                warn!("No torch CUDA library could be loaded; inference stays on CPU");
            }
            handles
        })
        .len()
}
