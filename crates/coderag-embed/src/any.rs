#[cfg(any(test, feature = "mock"))]
use crate::mock::MockEmbedder;
use crate::embedder::Embedder;
use crate::error::Result;
use crate::ollama::OllamaEmbedder;
use crate::openai::OpenAiEmbedder;

/// Generates a match over all `AnyEmbedder` variants, binding the inner embedder
/// and evaluating the given expression for each arm.
macro_rules! delegate_embedder {
    ($self:expr, |$e:ident| $expr:expr) => {
        match $self {
            AnyEmbedder::Ollama($e) => $expr,
            AnyEmbedder::OpenAi($e) => $expr,
            #[cfg(any(test, feature = "mock"))]
            AnyEmbedder::Mock($e) => $expr,
        }
    };
}

/// Closed set of embedding backends selected from configuration.
#[derive(Debug, Clone)]
pub enum AnyEmbedder {
    Ollama(OllamaEmbedder),
    OpenAi(OpenAiEmbedder),
    #[cfg(any(test, feature = "mock"))]
    Mock(MockEmbedder),
}

impl Embedder for AnyEmbedder {
    fn name(&self) -> &str {
        delegate_embedder!(self, |e| e.name())
    }

    fn model(&self) -> &str {
        delegate_embedder!(self, |e| e.model())
    }

    fn dimension(&self) -> Option<usize> {
        delegate_embedder!(self, |e| e.dimension())
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        delegate_embedder!(self, |e| e.embed_batch(texts).await)
    }
}
