pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# LOGFERRY CONFIGURATION
# =============================================================================
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/logferry/config.yml
#   3. /etc/logferry/config.yml
#
# Values may reference environment variables with $env{NAME}.

# Identifies this agent in request headers (defaults to the hostname)
# agent_id: web-01

# =============================================================================
# SOURCES
# =============================================================================
sources:
  # JSON lines, e.g. pino output: {"level":30,"time":1700000000000,"message":"..."}
  app:
    type: file
    # A glob creates one source per matching file
    path: /var/log/app/*.log
    format: json
    attributes:
      service: app
    read:
      # Where to start when no checkpoint exists: 'beginning' or 'end'
      start: beginning
      follow: true
      poll_interval: 250ms

  # Plain text lines received over TCP
  syslog_relay:
    type: socket
    listen: 127.0.0.1:5170
    format: text
    timestamp:
      # Must contain a named capture group 'ts'
      pattern: '^(?P<ts>\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(\.\d+)?Z)'
      # 'iso8601', 'epoch', 'epoch_ms', or a strptime format string
      format: iso8601
    level_pattern: '\b(?P<level>TRACE|DEBUG|INFO|WARN|ERROR|FATAL)\b'

# =============================================================================
# BUFFER
# =============================================================================
buffer:
  capacity: 10000
  # Readers pause at high_watermark and resume at low_watermark
  high_watermark: 8000
  low_watermark: 4000
  # A full buffer spills its oldest events to disk after this long
  spill_after: 5s
  spill_chunk: 500
  overflow_dir: ~/.local/share/logferry/overflow
  flush_interval: 1s
  batch:
    max_events: 500
    max_bytes: 1048576

# =============================================================================
# SHIPPER
# =============================================================================
shipper:
  endpoint: http://localhost:3100/ingest
  token: $env{LOGFERRY_TOKEN}
  # 'ndjson' or 'json'
  encoding: ndjson
  timeout: 10s
  concurrency: 2
  retry:
    max_attempts: 5
    initial_backoff: 200ms
    max_backoff: 30s

checkpoint:
  dir: ~/.local/share/logferry/checkpoints

dead_letter:
  path: ~/.local/share/logferry/dead-letter.jsonl

# Optional status endpoint (GET /health, GET /status)
# status:
#   listen: 127.0.0.1:7170

shutdown_grace: 10s
"#
    .to_string()
}
