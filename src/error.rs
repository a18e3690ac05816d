use std::fmt::{Debug, Display};

/// Errors surfaced by the graph builder and compiler.
///
/// `OutOfScope` and `Cycle` are not represented here: both are programmer
/// errors given the public API (a name can only go out of scope by calling
/// `get_image` outside a callback; a cycle can only arise from a builder bug)
/// and they `panic!` at the call site instead of being returned, matching
/// "are programmer errors and abort" in the error handling design.
#[derive(Clone)]
pub enum Error {
	/// Adding an image or pass whose name already exists in the owning scope.
	DuplicateName(String),
	/// Referencing an image or component not previously declared.
	UnknownName(String),
	/// A load-op/clear-value combination is inconsistent.
	ClearValueMismatch(String),
	/// A pass uses the same image twice, or declares two depth-stencil
	/// attachments.
	DoubleUse(String),
	/// The supplied device handle is unusable.
	InvalidDevice(String),
	/// A Vulkan call failed.
	Vulkan(ash::vk::Result),
}

impl Display for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Error::DuplicateName(m) => write!(f, "duplicate name: {m}"),
			Error::UnknownName(m) => write!(f, "unknown name: {m}"),
			Error::ClearValueMismatch(m) => write!(f, "clear value mismatch: {m}"),
			Error::DoubleUse(m) => write!(f, "double use: {m}"),
			Error::InvalidDevice(m) => write!(f, "invalid device: {m}"),
			Error::Vulkan(res) => write!(f, "vulkan error: {res}"),
		}
	}
}

impl Debug for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { <Self as Display>::fmt(self, f) }
}

impl std::error::Error for Error {}

impl From<ash::vk::Result> for Error {
	fn from(result: ash::vk::Result) -> Self { Error::Vulkan(result) }
}

pub type Result<T> = std::result::Result<T, Error>;
