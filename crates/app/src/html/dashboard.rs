/// Single-page dashboard: live previews, session status, run-signal buttons
/// and one SVG chart per process metric, refreshed by polling the JSON routes.
pub const DASHBOARD_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Deposition Monitor</title>
<style>
  body { margin: 0; font-family: "DejaVu Sans Mono", monospace; background: #101418; color: #d8dee4; }
  header { display: flex; align-items: center; gap: 1.5rem; padding: 0.6rem 1rem; background: #1a2027; }
  header h1 { font-size: 1.1rem; margin: 0; }
  #status { padding: 0.2rem 0.6rem; border-radius: 4px; background: #30363d; }
  #status.recording { background: #1f6f3f; }
  #status.waiting_for_trigger { background: #8a6d1d; }
  #status.tolerance_error { background: #a12b2b; }
  #sensor.down { color: #ff6b6b; }
  button { background: #30363d; color: inherit; border: 1px solid #484f58; padding: 0.25rem 0.8rem; cursor: pointer; }
  main { display: grid; grid-template-columns: minmax(320px, 1fr) minmax(420px, 1.3fr); gap: 1rem; padding: 1rem; }
  .previews img { width: 100%; background: #000; margin-bottom: 0.6rem; }
  .charts { display: grid; grid-template-columns: repeat(auto-fill, minmax(360px, 1fr)); gap: 0.8rem; }
  .chart { background: #161b22; padding: 0.4rem; }
  .chart h2 { font-size: 0.8rem; margin: 0 0 0.3rem 0; }
  svg { width: 100%; height: 160px; }
  #detail { font-size: 0.8rem; color: #ffb4b4; }
</style>
</head>
<body>
<header>
  <h1>Deposition Monitor</h1>
  <span id="status">idle</span>
  <span id="sensor">sensor: ?</span>
  <span id="trigger-box" hidden>
    <button onclick="trigger('on')">Run</button>
    <button onclick="trigger('off')">Halt</button>
  </span>
  <span id="detail"></span>
</header>
<main>
  <section class="previews">
    <img id="raw" alt="raw preview">
    <img id="annotated" alt="annotated preview">
    <img id="segmented" alt="segmented preview">
  </section>
  <section class="charts" id="charts"></section>
</main>
<script>
const W = 360, H = 160, PAD = 28;

function scale(v, lo, hi, a, b) {
  return hi === lo ? (a + b) / 2 : a + (v - lo) * (b - a) / (hi - lo);
}

function renderChart(c) {
  const [x0, x1] = c.x_limits, [y0, y1] = c.y_limits;
  const sx = v => scale(v, x0, x1, PAD, W - 6);
  const sy = v => scale(v, y0, y1, H - 18, 6);
  let svg = `<svg viewBox="0 0 ${W} ${H}">`;
  if (c.band) {
    const top = sy(c.band.upper), bottom = sy(c.band.lower);
    svg += `<rect x="${PAD}" y="${top}" width="${W - PAD - 6}" height="${Math.max(bottom - top, 1)}" fill="${c.style.color}" opacity="0.15"/>`;
  }
  if (c.centerline !== null && c.centerline !== undefined) {
    const y = sy(c.centerline);
    svg += `<line x1="${PAD}" x2="${W - 6}" y1="${y}" y2="${y}" stroke="${c.style.color}" stroke-dasharray="4 3" opacity="0.7"/>`;
  }
  const pts = c.line.map(([x, y]) => `${sx(x).toFixed(1)},${sy(y).toFixed(1)}`).join(" ");
  svg += `<polyline points="${pts}" fill="none" stroke="${c.style.color}" stroke-width="1.6"/>`;
  svg += `<text x="2" y="12" font-size="9" fill="#8b949e">${y1.toFixed(1)}</text>`;
  svg += `<text x="2" y="${H - 18}" font-size="9" fill="#8b949e">${y0.toFixed(1)}</text>`;
  svg += `<text x="${PAD}" y="${H - 4}" font-size="9" fill="#8b949e">${c.style.x_label} ${x0}..${x1}</text>`;
  return svg + "</svg>";
}

async function refreshCharts() {
  const resp = await fetch("/charts");
  if (!resp.ok) return;
  const charts = await resp.json();
  const root = document.getElementById("charts");
  root.innerHTML = charts.map(c =>
    `<div class="chart"><h2>${c.style.title} / ${c.style.series_label}</h2>${renderChart(c)}</div>`
  ).join("");
}

async function refreshStatus() {
  const resp = await fetch("/status");
  if (!resp.ok) return;
  const s = await resp.json();
  const el = document.getElementById("status");
  el.textContent = s.state.replaceAll("_", " ");
  el.className = s.state;
  document.getElementById("detail").textContent = s.detail || "";
  const sensor = document.getElementById("sensor");
  sensor.textContent = s.sensor_connected ? "sensor: connected" : "sensor: disconnected";
  sensor.className = s.sensor_connected ? "" : "down";
  document.getElementById("trigger-box").hidden = s.trigger === null;
}

function refreshPreviews() {
  for (const role of ["raw", "annotated", "segmented"]) {
    document.getElementById(role).src = `/preview/${role}.jpg?t=${Date.now()}`;
  }
}

async function trigger(state) {
  await fetch(`/trigger/${state}`, { method: "POST" });
  refreshStatus();
}

setInterval(refreshStatus, 250);
setInterval(refreshPreviews, 200);
setInterval(refreshCharts, 1000);
refreshStatus();
</script>
</body>
</html>
"##;
