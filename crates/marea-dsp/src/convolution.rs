//! Convolution engine
//!
//! Short impulse responses (<= 256 taps) run as a time-domain sliding sum;
//! longer responses use uniform partitioned FFT convolution (overlap-save
//! frequency delay line). Both paths produce output matching direct
//! convolution within 1e-5 per sample; the partitioned path adds one
//! partition of latency.

use std::sync::Arc;

use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex;

use marea_core::Sample;

use crate::{MonoProcessor, Processor};

/// Above this tap count the engine switches to partitioned FFT convolution
pub const DIRECT_TAP_LIMIT: usize = 256;

/// Partition size for the FFT path
const PARTITION_SIZE: usize = 256;

enum ConvMode {
    Direct(DirectConvolution),
    Partitioned(Box<PartitionedConvolution>),
}

/// Convolution engine with a configurable maximum IR length
pub struct ConvolutionEngine {
    max_length: usize,
    mode: ConvMode,
}

impl ConvolutionEngine {
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length,
            mode: ConvMode::Direct(DirectConvolution::new(&[1.0])),
        }
    }

    /// Install an impulse response, truncated to the configured maximum
    ///
    /// Rebuilding the partition plan allocates; call from the control side.
    pub fn set_impulse_response(&mut self, impulse: &[Sample]) {
        let ir = &impulse[..impulse.len().min(self.max_length)];
        if ir.is_empty() {
            self.mode = ConvMode::Direct(DirectConvolution::new(&[0.0]));
        } else if ir.len() <= DIRECT_TAP_LIMIT {
            self.mode = ConvMode::Direct(DirectConvolution::new(ir));
        } else {
            log::debug!(
                "convolution: {} taps, partitioned at {}",
                ir.len(),
                PARTITION_SIZE
            );
            self.mode = ConvMode::Partitioned(Box::new(PartitionedConvolution::new(
                ir,
                PARTITION_SIZE,
            )));
        }
    }

    pub fn impulse_length(&self) -> usize {
        match &self.mode {
            ConvMode::Direct(direct) => direct.ir.len(),
            ConvMode::Partitioned(part) => part.ir_length,
        }
    }
}

impl Processor for ConvolutionEngine {
    fn reset(&mut self) {
        match &mut self.mode {
            ConvMode::Direct(direct) => direct.reset(),
            ConvMode::Partitioned(part) => part.reset(),
        }
    }

    fn latency(&self) -> usize {
        match &self.mode {
            ConvMode::Direct(_) => 0,
            ConvMode::Partitioned(part) => part.partition_size,
        }
    }
}

impl MonoProcessor for ConvolutionEngine {
    #[inline]
    fn process_sample(&mut self, input: Sample) -> Sample {
        match &mut self.mode {
            ConvMode::Direct(direct) => direct.process_sample(input),
            ConvMode::Partitioned(part) => part.process_sample(input),
        }
    }
}

/// Fixed-capacity FIR filter with allocation-free impulse swaps
///
/// Unlike [`ConvolutionEngine`], loading a new impulse never allocates: the
/// tap and history buffers are sized once at construction. Used where the
/// impulse changes while audio is running (HRIR selection).
pub struct FirFilter {
    ir: Vec<f32>,
    ir_len: usize,
    history: Vec<f32>,
    mask: usize,
    write_index: usize,
}

impl FirFilter {
    /// Create an identity filter able to hold up to `max_taps` taps
    pub fn new(max_taps: usize) -> Self {
        let capacity = max_taps.max(2).next_power_of_two();
        let mut ir = vec![0.0; max_taps.max(1)];
        ir[0] = 1.0;
        Self {
            ir,
            ir_len: 1,
            history: vec![0.0; capacity],
            mask: capacity - 1,
            write_index: 0,
        }
    }

    /// Copy a new impulse in place, truncating to capacity
    pub fn load(&mut self, impulse: &[Sample]) {
        let len = impulse.len().min(self.ir.len());
        self.ir[..len].copy_from_slice(&impulse[..len]);
        self.ir_len = len.max(1);
    }

    pub fn taps(&self) -> usize {
        self.ir_len
    }
}

impl Processor for FirFilter {
    fn reset(&mut self) {
        self.history.fill(0.0);
        self.write_index = 0;
    }
}

impl MonoProcessor for FirFilter {
    #[inline]
    fn process_sample(&mut self, input: Sample) -> Sample {
        self.history[self.write_index] = input;

        let mut acc = 0.0_f32;
        for (tap, &coeff) in self.ir[..self.ir_len].iter().enumerate() {
            let index = (self.write_index + self.history.len() - tap) & self.mask;
            acc += coeff * self.history[index];
        }

        self.write_index = (self.write_index + 1) & self.mask;
        acc
    }
}

// ============ Direct path ============

struct DirectConvolution {
    ir: Vec<f32>,
    history: Vec<f32>,
    mask: usize,
    write_index: usize,
}

impl DirectConvolution {
    fn new(ir: &[Sample]) -> Self {
        let capacity = ir.len().max(2).next_power_of_two();
        Self {
            ir: ir.to_vec(),
            history: vec![0.0; capacity],
            mask: capacity - 1,
            write_index: 0,
        }
    }

    fn reset(&mut self) {
        self.history.fill(0.0);
        self.write_index = 0;
    }

    #[inline]
    fn process_sample(&mut self, input: Sample) -> Sample {
        self.history[self.write_index] = input;

        let mut acc = 0.0_f32;
        for (tap, &coeff) in self.ir.iter().enumerate() {
            let index = (self.write_index + self.history.len() - tap) & self.mask;
            acc += coeff * self.history[index];
        }

        self.write_index = (self.write_index + 1) & self.mask;
        acc
    }
}

// ============ Partitioned path ============

/// Uniform partitioned overlap-save convolution with a frequency delay line
struct PartitionedConvolution {
    partition_size: usize,
    fft_size: usize,
    ir_length: usize,

    fft_forward: Arc<dyn RealToComplex<f64>>,
    fft_inverse: Arc<dyn ComplexToReal<f64>>,

    /// FFT of each IR partition (half spectrum)
    ir_spectra: Vec<Vec<Complex<f64>>>,
    /// Input spectra ring, newest at `head`
    fdl: Vec<Vec<Complex<f64>>>,
    head: usize,

    /// Overlap-save input window (2 * partition_size)
    window: Vec<f64>,
    /// Scratch for forward transform input (destroyed by realfft)
    fft_in: Vec<f64>,
    spectrum_acc: Vec<Complex<f64>>,
    time_out: Vec<f64>,

    /// Sample FIFO plumbing
    in_fill: usize,
    out_block: Vec<f32>,
    out_read: usize,
    primed: bool,
}

impl PartitionedConvolution {
    fn new(ir: &[Sample], partition_size: usize) -> Self {
        let fft_size = partition_size * 2;
        let mut planner = RealFftPlanner::<f64>::new();
        let fft_forward = planner.plan_fft_forward(fft_size);
        let fft_inverse = planner.plan_fft_inverse(fft_size);
        let spectrum_len = fft_size / 2 + 1;

        let num_partitions = ir.len().div_ceil(partition_size);
        let mut ir_spectra = Vec::with_capacity(num_partitions);
        for part in 0..num_partitions {
            let start = part * partition_size;
            let end = (start + partition_size).min(ir.len());

            let mut padded = vec![0.0_f64; fft_size];
            for (dst, &src) in padded.iter_mut().zip(&ir[start..end]) {
                *dst = src as f64;
            }

            let mut spectrum = vec![Complex::new(0.0, 0.0); spectrum_len];
            fft_forward.process(&mut padded, &mut spectrum).ok();
            ir_spectra.push(spectrum);
        }

        Self {
            partition_size,
            fft_size,
            ir_length: ir.len(),
            fft_forward,
            fft_inverse,
            ir_spectra,
            fdl: vec![vec![Complex::new(0.0, 0.0); spectrum_len]; num_partitions],
            head: 0,
            window: vec![0.0; fft_size],
            fft_in: vec![0.0; fft_size],
            spectrum_acc: vec![Complex::new(0.0, 0.0); spectrum_len],
            time_out: vec![0.0; fft_size],
            in_fill: 0,
            out_block: vec![0.0; partition_size],
            out_read: 0,
            primed: false,
        }
    }

    fn reset(&mut self) {
        for spectrum in &mut self.fdl {
            spectrum.fill(Complex::new(0.0, 0.0));
        }
        self.window.fill(0.0);
        self.out_block.fill(0.0);
        self.head = 0;
        self.in_fill = 0;
        self.out_read = 0;
        self.primed = false;
    }

    #[inline]
    fn process_sample(&mut self, input: Sample) -> Sample {
        // Pop first: output lags input by exactly one partition
        let output = if self.primed {
            let value = self.out_block[self.out_read];
            self.out_read += 1;
            value
        } else {
            0.0
        };

        // Gather into the second half of the overlap-save window
        self.window[self.partition_size + self.in_fill] = input as f64;
        self.in_fill += 1;

        if self.in_fill == self.partition_size {
            self.process_partition();
            self.in_fill = 0;
            self.out_read = 0;
            self.primed = true;
        }

        output
    }

    fn process_partition(&mut self) {
        let num_partitions = self.fdl.len();

        // Forward transform of the full 2P window
        self.fft_in.copy_from_slice(&self.window);
        self.head = (self.head + num_partitions - 1) % num_partitions;
        self.fft_forward
            .process(&mut self.fft_in, &mut self.fdl[self.head])
            .ok();

        // Multiply-accumulate across the frequency delay line
        self.spectrum_acc.fill(Complex::new(0.0, 0.0));
        for (part, ir_spectrum) in self.ir_spectra.iter().enumerate() {
            let slot = &self.fdl[(self.head + part) % num_partitions];
            for ((acc, &x), &h) in self.spectrum_acc.iter_mut().zip(slot).zip(ir_spectrum) {
                *acc += x * h;
            }
        }

        // Inverse transform; the last P samples are the valid overlap-save
        // output. The DC and Nyquist bins must be purely real going in.
        let last = self.spectrum_acc.len() - 1;
        self.spectrum_acc[0].im = 0.0;
        self.spectrum_acc[last].im = 0.0;
        self.fft_inverse
            .process(&mut self.spectrum_acc, &mut self.time_out)
            .ok();

        let scale = 1.0 / self.fft_size as f64;
        for (out, &value) in self
            .out_block
            .iter_mut()
            .zip(&self.time_out[self.partition_size..])
        {
            *out = (value * scale) as f32;
        }

        // Slide the window: new block becomes the old half
        self.window.copy_within(self.partition_size.., 0);
    }
}
