/// Options for saving PDF documents
#[derive(Debug, Clone)]
pub struct SaveOptions {
    /// Flate-compress streams that carry no filter while writing them.
    pub compress_streams: bool,

    /// Write the binary comment line after the header.
    pub binary_mark: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        SaveOptions {
            compress_streams: false,
            binary_mark: true,
        }
    }
}

impl SaveOptions {
    /// Create a builder for SaveOptions
    pub fn builder() -> SaveOptionsBuilder {
        SaveOptionsBuilder {
            options: SaveOptions::default(),
        }
    }
}

/// Builder for SaveOptions
#[derive(Debug, Clone)]
pub struct SaveOptionsBuilder {
    options: SaveOptions,
}

impl SaveOptionsBuilder {
    /// Enable or disable stream compression
    pub fn compress_streams(mut self, value: bool) -> Self {
        self.options.compress_streams = value;
        self
    }

    /// Enable or disable the binary comment line
    pub fn binary_mark(mut self, value: bool) -> Self {
        self.options.binary_mark = value;
        self
    }

    /// Build the SaveOptions
    pub fn build(self) -> SaveOptions {
        self.options
    }
}
