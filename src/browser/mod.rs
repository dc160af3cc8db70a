//! 渲染实例层：无头浏览器的启动、复用与销毁

pub mod headless;
pub mod pool;
pub mod surface;

pub use headless::{ChromiumLauncher, ChromiumSurface};
pub use pool::{DisposableProvider, SurfacePool};
pub use surface::{RenderSurface, SurfaceLauncher, SurfaceProvider, SurfaceSettings};
