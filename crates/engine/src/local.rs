//! Local inference engine — runs a GGUF model on your own hardware.
//!
//! Uses [Candle](https://github.com/huggingface/candle) to run quantized
//! Llama-architecture models. The KV cache persists across turns, so each
//! turn only forwards the new prompt tokens; evicting the oldest tokens
//! forces a re-prefill of what remains on the next turn.
//!
//! # Example
//! ```bash
//! toolchat chat --model smollm:360m
//! toolchat chat --model /path/to/model.gguf
//! ```

use async_trait::async_trait;
use candle_core::quantized::gguf_file;
use candle_core::{Device, Tensor};
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::quantized_llama as qlm;
use hf_hub::api::sync::Api;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokenizers::Tokenizer;
use tokio::sync::{mpsc, Mutex};
use toolchat_core::engine::{FragmentStream, GenerationEngine, GenerationRequest};
use toolchat_core::error::EngineError;
use tracing::{debug, info, warn};

// ── Well-known model aliases ───────────────────────────────────────────

/// Friendly aliases that resolve to HuggingFace repos + filenames.
struct ModelPreset {
    repo: &'static str,
    gguf_file: &'static str,
    tokenizer_repo: &'static str,
    template: &'static str,
}

/// Preset names accepted by [`LocalEngine::load`].
pub const PRESETS: &[&str] = &[
    "tinyllama",
    "smollm:135m",
    "smollm:360m",
    "smollm:1.7b",
];

fn resolve_preset(alias: &str) -> Option<ModelPreset> {
    match alias.to_lowercase().as_str() {
        "tinyllama" | "tiny-llama" | "tinyllama-1.1b" => Some(ModelPreset {
            repo: "TheBloke/TinyLlama-1.1B-Chat-v1.0-GGUF",
            gguf_file: "tinyllama-1.1b-chat-v1.0.Q4_K_M.gguf",
            tokenizer_repo: "TinyLlama/TinyLlama-1.1B-Chat-v1.0",
            template: "tinyllama",
        }),
        "smollm" | "smollm:135m" | "smollm-135m" => Some(ModelPreset {
            repo: "TheBloke/SmolLM-135M-Instruct-GGUF",
            gguf_file: "smollm-135m-instruct.Q4_K_M.gguf",
            tokenizer_repo: "HuggingFaceTB/SmolLM-135M-Instruct",
            template: "chatml",
        }),
        "smollm:360m" | "smollm-360m" => Some(ModelPreset {
            repo: "TheBloke/SmolLM-360M-Instruct-GGUF",
            gguf_file: "smollm-360m-instruct.Q4_K_M.gguf",
            tokenizer_repo: "HuggingFaceTB/SmolLM-360M-Instruct",
            template: "chatml",
        }),
        "smollm:1.7b" | "smollm-1.7b" => Some(ModelPreset {
            repo: "TheBloke/SmolLM-1.7B-Instruct-GGUF",
            gguf_file: "smollm-1.7b-instruct.Q4_K_M.gguf",
            tokenizer_repo: "HuggingFaceTB/SmolLM-1.7B-Instruct",
            template: "chatml",
        }),
        _ => None,
    }
}

/// Load-time settings for [`LocalEngine`].
#[derive(Debug, Clone)]
pub struct LocalEngineOptions {
    /// Preset alias or path to a `.gguf` file.
    pub model: String,
    pub context_size: usize,
    /// Any value above zero asks for a CUDA device when one is available.
    pub gpu_layers: u32,
    pub temperature: f32,
    pub seed: u64,
}

// ── Local Engine ───────────────────────────────────────────────────────

/// A generation engine running a GGUF-quantized model via Candle.
///
/// Inference is single-threaded, so the model sits behind a Mutex and every
/// turn runs on a blocking thread.
pub struct LocalEngine {
    inner: Arc<Mutex<LocalModelState>>,
    tokenizer: Arc<Tokenizer>,
    resident: Arc<AtomicUsize>,
    model_name: String,
    template: &'static str,
    context_size: usize,
}

/// Weights plus the token-level view of the resident context.
struct LocalModelState {
    model: qlm::ModelWeights,
    device: Device,
    logits: LogitsProcessor,
    eos_token_id: u32,

    /// Every token logically in the context, oldest first.
    tokens: Vec<u32>,

    /// Length of the prefix of `tokens` already held in the KV cache.
    cached: usize,
}

impl LocalEngine {
    /// Load a model by preset alias or path (downloads if needed).
    ///
    /// Blocking; call from `spawn_blocking` inside async code.
    pub fn load(options: LocalEngineOptions) -> Result<Self, EngineError> {
        let device = if options.gpu_layers > 0 {
            Device::cuda_if_available(0).unwrap_or(Device::Cpu)
        } else {
            Device::Cpu
        };

        let (model_path, tokenizer, template) = if Path::new(&options.model).exists()
            && options.model.ends_with(".gguf")
        {
            let path = Path::new(&options.model).to_path_buf();
            let tokenizer = Self::tokenizer_beside(&path)?;
            (path, tokenizer, "chatml")
        } else {
            let preset = resolve_preset(&options.model).ok_or_else(|| {
                EngineError::ModelNotFound(format!(
                    "Unknown local model '{}'. Available presets: {}. \
                     Or provide a path to a .gguf file.",
                    options.model,
                    PRESETS.join(", ")
                ))
            })?;
            Self::download(&options.model, &preset)?
        };

        info!(path = %model_path.display(), "Loading local GGUF model");

        let mut file = std::fs::File::open(&model_path)
            .map_err(|e| EngineError::NotLoaded(format!("Failed to open model file: {e}")))?;
        let gguf = gguf_file::Content::read(&mut file)
            .map_err(|e| EngineError::NotLoaded(format!("Failed to parse GGUF file: {e}")))?;
        let model = qlm::ModelWeights::from_gguf(gguf, &mut file, &device)
            .map_err(|e| EngineError::NotLoaded(format!("Failed to load model weights: {e}")))?;

        let eos_token_id = tokenizer
            .token_to_id("</s>")
            .or_else(|| tokenizer.token_to_id("<|endoftext|>"))
            .or_else(|| tokenizer.token_to_id("<|im_end|>"))
            .or_else(|| tokenizer.token_to_id("<|eot_id|>"))
            .unwrap_or(2);

        let logits = if options.temperature <= 0.0 {
            LogitsProcessor::new(options.seed, None, None)
        } else {
            LogitsProcessor::new(options.seed, Some(options.temperature as f64), None)
        };

        info!(
            model = %options.model,
            eos_token_id,
            context_size = options.context_size,
            "Local model loaded"
        );

        Ok(Self {
            inner: Arc::new(Mutex::new(LocalModelState {
                model,
                device,
                logits,
                eos_token_id,
                tokens: Vec::new(),
                cached: 0,
            })),
            tokenizer: Arc::new(tokenizer),
            resident: Arc::new(AtomicUsize::new(0)),
            model_name: options.model,
            template,
            context_size: options.context_size,
        })
    }

    /// Chat template the model was trained with ("chatml", "tinyllama", "llama3").
    pub fn preferred_template(&self) -> &'static str {
        self.template
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    fn download(
        alias: &str,
        preset: &ModelPreset,
    ) -> Result<(std::path::PathBuf, Tokenizer, &'static str), EngineError> {
        info!(
            model = alias,
            repo = preset.repo,
            file = preset.gguf_file,
            "Downloading/loading local model"
        );

        let api = Api::new().map_err(|e| {
            EngineError::NotLoaded(format!("Failed to initialize HuggingFace Hub API: {e}"))
        })?;

        let model_path = api
            .model(preset.repo.to_string())
            .get(preset.gguf_file)
            .map_err(|e| {
                EngineError::NotLoaded(format!(
                    "Failed to download model '{}' from '{}': {e}",
                    preset.gguf_file, preset.repo
                ))
            })?;

        let tokenizer_path = api
            .model(preset.tokenizer_repo.to_string())
            .get("tokenizer.json")
            .map_err(|e| {
                EngineError::NotLoaded(format!(
                    "Failed to download tokenizer from '{}': {e}",
                    preset.tokenizer_repo
                ))
            })?;

        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| EngineError::NotLoaded(format!("Failed to load tokenizer: {e}")))?;

        Ok((model_path, tokenizer, preset.template))
    }

    /// `tokenizer.json` next to the GGUF file, or the TinyLlama one as fallback.
    fn tokenizer_beside(path: &Path) -> Result<Tokenizer, EngineError> {
        let local = path.with_file_name("tokenizer.json");
        let tokenizer_path = if local.exists() {
            local
        } else {
            warn!("No tokenizer.json found next to GGUF file, downloading TinyLlama tokenizer");
            Api::new()
                .map_err(|e| EngineError::NotLoaded(format!("HuggingFace Hub API error: {e}")))?
                .model("TinyLlama/TinyLlama-1.1B-Chat-v1.0".to_string())
                .get("tokenizer.json")
                .map_err(|e| {
                    EngineError::NotLoaded(format!("Failed to download fallback tokenizer: {e}"))
                })?
        };
        Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| EngineError::NotLoaded(format!("Failed to load tokenizer: {e}")))
    }
}

fn map_candle_err(e: candle_core::Error) -> EngineError {
    EngineError::Decode(format!("Candle inference error: {e}"))
}

impl LocalModelState {
    /// Forward every uncached token and return logits for the last position.
    fn forward_pending(&mut self) -> Result<Tensor, EngineError> {
        let input = Tensor::new(&self.tokens[self.cached..], &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(map_candle_err)?;
        let logits = self
            .model
            .forward(&input, self.cached)
            .map_err(map_candle_err)?;
        self.cached = self.tokens.len();

        let logits = logits.squeeze(0).map_err(map_candle_err)?;
        match logits.rank() {
            1 => Ok(logits),
            _ => {
                let last = logits.dim(0).map_err(map_candle_err)? - 1;
                logits.get(last).map_err(map_candle_err)
            }
        }
    }

    /// Generate one turn, handing each decoded fragment to `emit`.
    ///
    /// Stops on EOS, `max_units`, a full context, or when `emit` returns false.
    fn run_turn(
        &mut self,
        tokenizer: &Tokenizer,
        max_units: usize,
        capacity: usize,
        mut emit: impl FnMut(String) -> bool,
    ) -> Result<(), EngineError> {
        let mut turn = TurnText::default();
        let decode = |ids: &[u32]| {
            tokenizer
                .decode(ids, true)
                .map_err(|e| EngineError::Decode(format!("Detokenization failed: {e}")))
        };

        while turn.generated.len() < max_units && self.tokens.len() < capacity {
            let logits = self.forward_pending()?;
            let next = self.logits.sample(&logits).map_err(map_candle_err)?;
            if next == self.eos_token_id {
                break;
            }
            self.tokens.push(next);

            if !turn.offer(next, &decode, &mut emit)? {
                debug!("Receiver dropped, stopping generation");
                // Keep only what the receiver saw.
                let kept = self.tokens.len() - turn.undelivered();
                self.tokens.truncate(kept);
                if self.cached > kept {
                    self.cached = 0;
                }
                break;
            }
        }

        debug!(generated = turn.generated.len(), resident = self.tokens.len(), "Turn complete");
        Ok(())
    }
}

/// Tokens of the turn in progress and how much of their text went out.
#[derive(Debug, Default)]
struct TurnText {
    generated: Vec<u32>,
    /// Bytes of decoded text already emitted.
    emitted: usize,
    /// Tokens whose text has been emitted in full.
    delivered: usize,
}

impl TurnText {
    /// Add `next` and emit whatever new text it completes.
    ///
    /// Returns false when `emit` refuses; `next` and any tokens still
    /// waiting on a char boundary are then left undelivered.
    fn offer(
        &mut self,
        next: u32,
        decode: impl Fn(&[u32]) -> Result<String, EngineError>,
        emit: &mut impl FnMut(String) -> bool,
    ) -> Result<bool, EngineError> {
        self.generated.push(next);
        let decoded = decode(&self.generated)?;
        if decoded.len() > self.emitted && decoded.is_char_boundary(self.emitted) {
            if !emit(decoded[self.emitted..].to_string()) {
                return Ok(false);
            }
            self.emitted = decoded.len();
            self.delivered = self.generated.len();
        }
        Ok(true)
    }

    /// Generated tokens whose text has not been emitted.
    fn undelivered(&self) -> usize {
        self.generated.len() - self.delivered
    }
}

// ── Engine trait implementation ────────────────────────────────────────

#[async_trait]
impl GenerationEngine for LocalEngine {
    fn name(&self) -> &str {
        "local"
    }

    fn capacity(&self) -> usize {
        self.context_size
    }

    fn count_units(&self, text: &str) -> Result<usize, EngineError> {
        self.tokenizer
            .encode(text, false)
            .map(|enc| enc.get_ids().len())
            .map_err(|e| EngineError::Tokenization(e.to_string()))
    }

    fn resident_units(&self) -> Option<usize> {
        Some(self.resident.load(Ordering::SeqCst))
    }

    async fn generate(&self, request: GenerationRequest) -> Result<FragmentStream, EngineError> {
        let (tx, rx) = mpsc::channel(64);
        let inner = Arc::clone(&self.inner);
        let tokenizer = Arc::clone(&self.tokenizer);
        let resident = Arc::clone(&self.resident);
        let capacity = self.context_size;

        // Tokenize before spawning so overflow surfaces as an error, not a stream item.
        let first_turn = resident.load(Ordering::SeqCst) == 0;
        let prompt_tokens = tokenizer
            .encode(request.prompt.as_str(), first_turn)
            .map_err(|e| EngineError::Tokenization(e.to_string()))?
            .get_ids()
            .to_vec();

        {
            let mut state = self.inner.lock().await;
            let needed = state.tokens.len() + prompt_tokens.len();
            if needed > capacity {
                return Err(EngineError::ContextOverflow { needed, capacity });
            }
            state.tokens.extend_from_slice(&prompt_tokens);
            resident.store(state.tokens.len(), Ordering::SeqCst);
        }

        debug!(
            prompt_tokens = prompt_tokens.len(),
            max_units = request.max_units,
            "Starting local generation"
        );

        tokio::task::spawn_blocking(move || {
            let mut state = inner.blocking_lock();
            let result = state.run_turn(&tokenizer, request.max_units, capacity, |fragment| {
                tx.blocking_send(Ok(fragment)).is_ok()
            });
            resident.store(state.tokens.len(), Ordering::SeqCst);
            if let Err(e) = result {
                let _ = tx.blocking_send(Err(e));
            }
        });

        Ok(rx)
    }

    async fn evict_oldest(&self, units: usize) -> Result<(), EngineError> {
        let mut state = self.inner.lock().await;
        let dropped = units.min(state.tokens.len());
        state.tokens.drain(..dropped);
        // Positions shifted; the cache must be rebuilt from scratch.
        state.cached = 0;
        self.resident.store(state.tokens.len(), Ordering::SeqCst);
        debug!(dropped, resident = state.tokens.len(), "Evicted oldest tokens");
        Ok(())
    }

    async fn reset(&self) -> Result<(), EngineError> {
        let mut state = self.inner.lock().await;
        state.tokens.clear();
        state.cached = 0;
        self.resident.store(0, Ordering::SeqCst);
        Ok(())
    }
}
