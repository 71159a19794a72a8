//! Vendor status codes for the SPI/DIO interface driver.
//!
//! Every driver call reports an `i32` where `0` is success and negative
//! values name a specific fault. [`StatusCode`] is the closed set of known
//! codes; anything outside the table is kept verbatim in
//! [`StatusCode::Other`] so a raw code is never lost.

use std::fmt;

macro_rules! status_codes {
    ($($variant:ident = $code:literal => $text:literal,)+) => {
        /// A driver status code.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum StatusCode {
            $($variant,)+
            /// A code not present in the vendor table.
            Other(i32),
        }

        impl StatusCode {
            /// Maps a raw driver code onto the closed set.
            pub fn from_raw(code: i32) -> Self {
                match code {
                    $($code => StatusCode::$variant,)+
                    other => StatusCode::Other(other),
                }
            }

            /// The raw driver code, unchanged.
            pub fn code(self) -> i32 {
                match self {
                    $(StatusCode::$variant => $code,)+
                    StatusCode::Other(code) => code,
                }
            }

            /// Human-readable diagnostic.
            pub fn description(self) -> &'static str {
                match self {
                    $(StatusCode::$variant => $text,)+
                    StatusCode::Other(_) => "unrecognized driver status",
                }
            }
        }
    };
}

status_codes! {
    Success = 0 => "success",

    // General
    InsufficientMemory = -301700 => "insufficient memory",
    InvalidResourceName = -301701 => "invalid resource name",
    InvalidClockRate = -301702 => "invalid clock rate",
    TooManyScriptReads = -301703 => "too many script reads",
    InvalidScriptReadIndex = -301704 => "invalid script read index",
    InvalidScriptReference = -301705 => "invalid script reference",
    InvalidDeviceId = -301706 => "invalid device id",
    ConnectionLost = -301707 => "connection to the device was lost",
    Timeout = -301708 => "operation timed out",
    InternalError = -301709 => "internal driver error",
    InvalidConfigurationReference = -301710 => "invalid configuration reference",
    TooManyConfigurations = -301711 => "too many open configurations",
    InvalidActiveProperty = -301712 => "invalid active property",
    InvalidParameter = -301713 => "invalid parameter",
    ResourceBusy = -301714 => "resource busy",
    InvalidMasterCode = -301715 => "invalid master code",
    MasterCodeAck = -301716 => "master code acknowledged",
    InStreamingMode = -301717 => "device is in streaming mode",
    OverCurrentError = -301718 => "over-current on I/O lines",
    UnknownError = -301719 => "unknown error",

    // General, reported by the device
    BadOpcode = -301720 => "bad opcode",
    UnknownStatus = -301721 => "unknown status",
    ProtocolViolation = -301722 => "protocol violation",
    InvalidScript = -301723 => "invalid script",
    InvalidFirmware = -301724 => "invalid firmware",
    IncompatibleFirmware = -301725 => "incompatible firmware",

    // SPI
    MasterWriteCollision = -301730 => "SPI master write collision",
    InvalidSpiPortNumber = -301732 => "invalid SPI port number",
    InvalidCsPortNumber = -301733 => "invalid chip-select port number",
    InvalidChipSelect = -301734 => "invalid chip select",
    InvalidBitsPerSample = -301735 => "invalid bits per sample",

    // I2C
    MasterBusFreeTimeout = -301740 => "I2C bus free timeout",
    MasterCodeArbLost = -301741 => "I2C master code arbitration lost",
    MasterAddressNotAcknowledged = -301742 => "I2C address not acknowledged",
    MasterDataNotAcknowledged = -301743 => "I2C data not acknowledged",
    MasterAddressArbitrationLost = -301744 => "I2C address arbitration lost",
    MasterDataArbitrationLost = -301745 => "I2C data arbitration lost",
    InvalidI2cPortNumber = -301746 => "invalid I2C port number",

    // DIO
    InvalidDioPortNumber = -301750 => "invalid DIO port number",
    InvalidDioLineNumber = -301751 => "invalid DIO line number",

    // Streaming
    NotInStreamingMode = -301760 => "device is not in streaming mode",

    // I2C slave
    InSlaveMode = -301770 => "device is in I2C slave mode",
    NotInSlaveMode = -301771 => "device is not in I2C slave mode",
    InvalidDataBufferSize = -301772 => "invalid data buffer size",
    InvalidSlaveAddress = -301773 => "invalid I2C slave address",
    I2cSpecViolation = -301774 => "I2C specification violation",
    SpiStreamingModeNotSupported = -301780 => "SPI streaming mode not supported",
    I2cSlaveModeNotSupported = -301781 => "I2C slave mode not supported",
    InvalidI2cSlaveEventResponse = -301782 => "invalid I2C slave event response",
    I2cSlaveEventPending = -301783 => "I2C slave event pending",
}

impl StatusCode {
    /// `true` for [`StatusCode::Success`].
    pub fn is_success(self) -> bool {
        self == StatusCode::Success
    }

    /// Converts a raw driver return value into `Ok(())` or the failing code.
    ///
    /// Intended for driver bindings that receive the vendor's `i32`.
    pub fn check(raw: i32) -> Result<(), StatusCode> {
        match StatusCode::from_raw(raw) {
            StatusCode::Success => Ok(()),
            status => Err(status),
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description(), self.code())
    }
}
