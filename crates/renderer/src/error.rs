/// Fatal failure while bringing up the compositor's GPU state.
///
/// An instance that reports one of these stays failed; callers recreate the
/// compositor to try again.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InitError {
    #[error("failed to create rendering surface: {0}")]
    Surface(String),
    #[error("no suitable GPU adapter: {0}")]
    Adapter(String),
    #[error("failed to create GPU device: {0}")]
    Device(String),
    #[error("{stage} shader failed to compile: {message}")]
    ShaderCompile {
        stage: &'static str,
        message: String,
    },
    #[error("shader program failed to link: {0}")]
    ProgramLink(String),
    #[error("failed to allocate {resource}: {message}")]
    Allocation {
        resource: &'static str,
        message: String,
    },
    #[error("renderer already failed to initialise: {0}")]
    Terminal(String),
}
