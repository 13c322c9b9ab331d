// hammock - GPU context and swapchain core
//
// The editor binary in main.rs is one consumer; the renderer layer is another.

pub mod backend;
pub mod config;
