use clap::{Parser, Subcommand, ValueEnum};
use oplmidi::opl::instruments::PERCUSSION_BASE;
use oplmidi::opl::{NullSink, OutputLevel, PortSink, RegisterSink, INSTRUMENTS};
use oplmidi::transport::{self, StopFlag, TransportOptions};
use oplmidi::vgm::{self, Gd3Metadata, VgmJson, VgmReader};
use oplmidi::{MidiFile, PlaybackSession, RenderOptions, SessionConfig, WavOptions};
use std::fs::File;
use std::io::{self, BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};

/// File played when the prompt is left empty
const DEFAULT_SONG: &str = "chmmr.mid";

#[derive(Parser, Debug)]
#[command(name = "oplmidi")]
#[command(version)]
#[command(about = "MIDI player and VGM/WAV renderer for the OPL3", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Play a MIDI file on OPL3 hardware in real time
    Play {
        /// MIDI file (prompts if not specified)
        file: Option<PathBuf>,

        /// Where register writes go
        #[arg(long, value_enum, default_value_t = SinkKind::Port)]
        sink: SinkKind,

        /// OPL3 base I/O port
        #[arg(long, default_value = "0x388", value_parser = parse_port)]
        port: u16,

        /// Restart when the song ends
        #[arg(long = "loop")]
        looping: bool,

        /// Master volume in percent
        #[arg(long, default_value_t = 100)]
        volume: u16,
    },

    /// Render a MIDI file to VGM (gzip compressed for .vgz) or to WAV audio
    Convert {
        input: PathBuf,
        output: PathBuf,

        /// Synthesize audio instead of logging registers (implied by .wav)
        #[arg(long)]
        wav: bool,

        /// Loop the whole song when it has no loop markers (VGM only)
        #[arg(long = "loop")]
        looping: bool,

        /// Master volume in percent (WAV only)
        #[arg(long, default_value_t = 100)]
        volume: u16,

        /// Stop rendering after this many seconds
        #[arg(long, default_value_t = 1200.0)]
        max_seconds: f64,

        /// GD3 title, defaults to the input file name (VGM only)
        #[arg(long)]
        title: Option<String>,
    },

    /// Print the playback events of a MIDI file as JSON
    Dump {
        input: PathBuf,

        /// Output JSON file (writes to stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output compact JSON (default is pretty-printed)
        #[arg(short, long)]
        compact: bool,

        #[arg(long, default_value_t = 1200.0)]
        max_seconds: f64,
    },

    /// Convert a VGM/VGZ file to JSON
    Inspect {
        input: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(short, long)]
        compact: bool,
    },

    /// List the FM instrument table
    Instruments,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum SinkKind {
    /// Raw I/O ports through /dev/port
    Port,
    /// Discard all writes
    Null,
}

fn parse_port(value: &str) -> Result<u16, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|e| format!("invalid port '{value}': {e}"))
}

fn main() -> Result<(), oplmidi::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    match args.command {
        Command::Play {
            file,
            sink,
            port,
            looping,
            volume,
        } => {
            let path = match file {
                Some(path) => path,
                None => prompt_for_file()?,
            };
            let midi = MidiFile::open(&path)?;
            let config = SessionConfig {
                base_port: port,
                output: OutputLevel::with_gain(volume),
            };
            let options = TransportOptions { looping };
            match sink {
                SinkKind::Port => {
                    let mut sink = play(midi, PortSink::open()?, config, &options)?;
                    if let Some(err) = sink.take_error() {
                        return Err(err);
                    }
                }
                SinkKind::Null => {
                    play(midi, NullSink, config, &options)?;
                }
            }
        }
        Command::Convert {
            input,
            output,
            wav,
            looping,
            volume,
            max_seconds,
            title,
        } => {
            let midi = MidiFile::open(&input)?;
            if wav || is_wav_path(&output) {
                let options = WavOptions {
                    max_seconds,
                    output: OutputLevel::with_gain(volume),
                    ..WavOptions::default()
                };
                let file = BufWriter::new(File::create(&output)?);
                let rendered = oplmidi::render_wav(midi, &options, file)?;
                println!(
                    "Wrote {:.1}s of audio to {}",
                    rendered.seconds(),
                    output.display()
                );
                return Ok(());
            }
            let title = title.unwrap_or_else(|| file_title(&input));
            let options = RenderOptions {
                loop_song: looping,
                max_seconds,
                metadata: Gd3Metadata::for_midi(&title),
            };
            let rendered = oplmidi::render_vgm(midi, &options)?;
            vgm::write_vgm_file(&output, &rendered.data)?;
        }
        Command::Dump {
            input,
            output,
            compact,
            max_seconds,
        } => {
            let midi = MidiFile::open(&input)?;
            let dump = oplmidi::dump_events(midi, max_seconds);
            let json = if compact {
                serde_json::to_string(&dump)?
            } else {
                serde_json::to_string_pretty(&dump)?
            };
            write_output(output.as_deref(), &json)?;
        }
        Command::Inspect {
            input,
            output,
            compact,
        } => {
            let data = vgm::read_vgm_file(&input)?;
            let mut reader = VgmReader::new(&data);

            let header = reader.parse_header()?;
            let gd3 = reader.parse_gd3(&header)?;
            let commands = reader.parse_commands(&header)?;
            let vgm_json = VgmJson::new(&header, gd3.as_ref(), commands);
            let (writes, samples) = vgm_json.summary();
            log::info!("{writes} register writes over {samples} samples");

            let json = if compact {
                serde_json::to_string(&vgm_json)?
            } else {
                serde_json::to_string_pretty(&vgm_json)?
            };
            write_output(output.as_deref(), &json)?;
        }
        Command::Instruments => {
            for (id, instrument) in INSTRUMENTS.iter().enumerate() {
                if id >= PERCUSSION_BASE {
                    println!(
                        "{:3}  {:<24} drum, note {}",
                        id, instrument.name, instrument.percussion_note
                    );
                } else {
                    println!("{:3}  {}", id, instrument.name);
                }
            }
        }
    }

    Ok(())
}

/// Run the interactive transport and hand the sink back afterwards
fn play<S: RegisterSink>(
    midi: MidiFile,
    sink: S,
    config: SessionConfig,
    options: &TransportOptions,
) -> Result<S, oplmidi::Error> {
    let mut session = PlaybackSession::new(midi, sink, config);
    println!("q quit, space pause, +/- volume, n normalize");
    transport::run(&mut session, options, &StopFlag::new())?;
    Ok(session.into_sink())
}

fn prompt_for_file() -> io::Result<PathBuf> {
    print!("MIDI file [{DEFAULT_SONG}]: ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let name = line.trim();
    Ok(PathBuf::from(if name.is_empty() { DEFAULT_SONG } else { name }))
}

fn file_title(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn is_wav_path(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"))
}

fn write_output(path: Option<&Path>, json: &str) -> io::Result<()> {
    match path {
        Some(path) => {
            let mut file = File::create(path)?;
            file.write_all(json.as_bytes())?;
            file.write_all(b"\n")?;
        }
        None => println!("{}", json),
    }
    Ok(())
}
