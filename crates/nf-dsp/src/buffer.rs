use nf_core::frame::SampleFrame;

/// Fenêtre glissante C × N des échantillons les plus récents.
///
/// Invariant : chaque ligne contient, dans l'ordre, les `min(ingérés, N)`
/// derniers échantillons du canal, précédés de zéros tant que le buffer
/// n'est pas plein.
///
/// # Example
/// ```
/// use nf_core::frame::SampleFrame;
/// use nf_dsp::buffer::SampleBuffer;
///
/// let mut buf = SampleBuffer::new(1, 4);
/// buf.update(&SampleFrame::new(vec![vec![1.0, 2.0]]));
/// assert_eq!(buf.channel(0), &[0.0, 0.0, 1.0, 2.0]);
/// ```
#[derive(Clone, Debug)]
pub struct SampleBuffer {
    /// Une ligne par canal, `capacity` échantillons chacune.
    rows: Vec<Vec<f64>>,
    capacity: usize,
    /// Nombre d'échantillons réels (hors zéros de tête).
    filled: usize,
}

impl SampleBuffer {
    /// Crée un buffer pré-alloué à zéro.
    #[must_use]
    pub fn new(channels: usize, capacity: usize) -> Self {
        Self {
            rows: vec![vec![0.0; capacity]; channels],
            capacity,
            filled: 0,
        }
    }

    /// Ingère une frame.
    ///
    /// Frame ≥ capacité : le buffer devient les `capacity` derniers
    /// échantillons de la frame. Sinon décalage à gauche de la longueur de la
    /// frame, puis copie en queue. Frame vide : no-op. Les canaux absents de
    /// la frame reçoivent des zéros, les canaux en trop sont ignorés.
    pub fn update(&mut self, frame: &SampleFrame) {
        let len = frame.len();
        if len == 0 || self.capacity == 0 {
            return;
        }
        let cap = self.capacity;

        for (ch, row) in self.rows.iter_mut().enumerate() {
            let src = frame.channels.get(ch).map(|c| &c[..len]);
            if len >= cap {
                match src {
                    Some(s) => row.copy_from_slice(&s[len - cap..]),
                    None => row.fill(0.0),
                }
            } else {
                row.copy_within(len.., 0);
                let tail = &mut row[cap - len..];
                match src {
                    Some(s) => tail.copy_from_slice(s),
                    None => tail.fill(0.0),
                }
            }
        }

        self.filled = (self.filled + len).min(cap);
    }

    /// Fenêtre complète, `[canal][échantillon]`.
    #[must_use]
    pub fn window(&self) -> &[Vec<f64>] {
        &self.rows
    }

    /// Un canal de la fenêtre.
    ///
    /// # Panics
    /// Panics if `index` is out of range.
    #[must_use]
    pub fn channel(&self, index: usize) -> &[f64] {
        &self.rows[index]
    }

    /// Capacité N par canal.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Nombre de canaux C.
    #[must_use]
    pub fn channels(&self) -> usize {
        self.rows.len()
    }

    /// Échantillons réels présents (≤ capacité).
    #[must_use]
    pub fn filled(&self) -> usize {
        self.filled
    }
}
